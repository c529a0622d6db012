//! Tournament string classification.
//!
//! Pure keyword cascade: Grand Slam -> Masters -> ATP/WTA -> Challenger ->
//! ITF/Futures -> Unknown. Grand Slam names always map to their canonical
//! surface regardless of year.

use crate::models::{Surface, TourLevel};
use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Women's ITF events: W15, W25, W40, W60, W80, W100.
    static ref WOMEN_ITF: Regex = Regex::new(r"(?i)\bw(?:15|25|40|60|80|100)\b").unwrap();
}

const MASTERS_CLAY: [&str; 3] = ["monte carlo", "madrid", "rome"];
const MASTERS_HARD: [&str; 7] = [
    "indian wells",
    "miami",
    "canada",
    "canadian open",
    "cincinnati",
    "shanghai",
    "paris masters",
];

/// Classify a tournament into (surface, level). Surface is None when nothing
/// in the name pins it down; callers fall back to `surface_or_default`.
pub fn classify(tournament: &str, _date: Option<NaiveDate>) -> (Option<Surface>, TourLevel) {
    let name = tournament.to_lowercase();

    // Grand Slams carry their surface with them.
    if name.contains("australian open") {
        return (Some(Surface::Hard), TourLevel::GrandSlam);
    }
    if name.contains("roland garros") || name.contains("french open") {
        return (Some(Surface::Clay), TourLevel::GrandSlam);
    }
    if name.contains("wimbledon") {
        return (Some(Surface::Grass), TourLevel::GrandSlam);
    }
    if name.contains("us open") || name.contains("u.s. open") {
        return (Some(Surface::Hard), TourLevel::GrandSlam);
    }

    let surface_hint = surface_from_keywords(&name);

    if MASTERS_CLAY.iter().any(|m| name.contains(m)) {
        return (surface_hint.or(Some(Surface::Clay)), TourLevel::Masters);
    }
    if MASTERS_HARD.iter().any(|m| name.contains(m)) || name.contains("masters") {
        return (surface_hint.or(Some(Surface::Hard)), TourLevel::Masters);
    }

    if name.contains("challenger") {
        return (surface_hint, TourLevel::Challenger);
    }

    if name.contains("itf") || name.contains("futures") || WOMEN_ITF.is_match(&name) {
        return (surface_hint, TourLevel::Itf);
    }

    if name.contains("wta") || is_womens_event(&name) {
        return (surface_hint, TourLevel::Wta);
    }
    if name.contains("atp") || name.contains("500") || name.contains("250") || name.contains("open")
    {
        return (surface_hint, TourLevel::Atp);
    }

    (surface_hint, TourLevel::Unknown)
}

/// True when the name carries an explicit women's marker.
pub fn is_womens_event(tournament: &str) -> bool {
    let name = tournament.to_lowercase();
    if WOMEN_ITF.is_match(&name) {
        return true;
    }
    name.contains("women") || name.contains("ladies")
}

/// True when the name carries an explicit men's marker (and no women's one).
pub fn is_mens_event(tournament: &str) -> bool {
    if is_womens_event(tournament) {
        return false;
    }
    let name = tournament.to_lowercase();
    name.contains("men")
}

fn surface_from_keywords(name: &str) -> Option<Surface> {
    if name.contains("clay") {
        Some(Surface::Clay)
    } else if name.contains("grass") {
        Some(Surface::Grass)
    } else if name.contains("carpet") {
        Some(Surface::Carpet)
    } else if name.contains("hard") || name.contains("indoor") {
        Some(Surface::Hard)
    } else {
        None
    }
}

/// Surface with the capture default applied. The tour is hard-court heavy,
/// so an unclassifiable name falls back to Hard.
pub fn surface_or_default(tournament: &str, date: Option<NaiveDate>) -> Surface {
    classify(tournament, date).0.unwrap_or(Surface::Hard)
}

/// Level alone, for K-factor selection and model gating.
pub fn tour_level(tournament: &str) -> TourLevel {
    classify(tournament, None).1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grand_slams_pin_surface() {
        assert_eq!(
            classify("Australian Open 2026", None),
            (Some(Surface::Hard), TourLevel::GrandSlam)
        );
        assert_eq!(
            classify("Roland Garros", None),
            (Some(Surface::Clay), TourLevel::GrandSlam)
        );
        assert_eq!(
            classify("Wimbledon - Gentlemen's Singles", None),
            (Some(Surface::Grass), TourLevel::GrandSlam)
        );
        assert_eq!(
            classify("US Open", None),
            (Some(Surface::Hard), TourLevel::GrandSlam)
        );
    }

    #[test]
    fn masters_cascade() {
        assert_eq!(tour_level("BNP Paribas Open Indian Wells"), TourLevel::Masters);
        let (surface, level) = classify("Rome Masters", None);
        assert_eq!(level, TourLevel::Masters);
        assert_eq!(surface, Some(Surface::Clay));
    }

    #[test]
    fn challenger_and_itf() {
        assert_eq!(tour_level("Seville Challenger"), TourLevel::Challenger);
        assert_eq!(tour_level("ITF M25 Monastir"), TourLevel::Itf);
        assert_eq!(tour_level("W60 Nottingham"), TourLevel::Itf);
    }

    #[test]
    fn womens_itf_pattern() {
        assert!(is_womens_event("W25 Santarem"));
        assert!(is_womens_event("ITF Women Antalya"));
        assert!(!is_womens_event("M15 Doha"));
        assert!(is_mens_event("ITF Men Cairo"));
        assert!(!is_mens_event("ITF Women Antalya"));
    }

    #[test]
    fn surface_default_is_hard() {
        assert_eq!(surface_or_default("Mystery Cup", None), Surface::Hard);
        assert_eq!(surface_or_default("Bastad Clay Open", None), Surface::Clay);
    }
}
