//! External data acquisition: the betting exchange, the sharp-odds
//! reference book, and the completed-results feed.

pub mod capture;
pub mod exchange;
pub mod results;
pub mod sharp;
