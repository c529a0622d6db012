//! Sharp-book reference odds.
//!
//! Pulls head-to-head prices from an odds aggregator so captured exchange
//! markets can be annotated with what the sharpest book thinks. Annotation
//! only: the verdict is stored and logged, never used to gate candidates.

use crate::resolver::{same_last_name, similarity};
use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const API_BASE: &str = "https://api.the-odds-api.com/v4";
const SPORT_KEYS: [&str; 2] = ["tennis_atp", "tennis_wta"];
const NAME_MATCH_THRESHOLD: f64 = 0.75;

/// How far the exchange price may sit below the reference before the
/// comparison flags it.
const CAUTION_RATIO: f64 = 0.075;
const DISCREPANCY_RATIO: f64 = 0.15;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharpMatchOdds {
    pub player1_name: String,
    pub player2_name: String,
    pub player1_odds: f64,
    pub player2_odds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SharpVerdict {
    /// Exchange at or above the reference price: fine, possibly good value.
    Ok,
    /// Exchange noticeably below the reference on one side.
    Caution,
    /// Exchange far below the reference; the market likely knows something.
    Discrepancy,
}

/// Compare exchange odds to the reference pair. The worst side drives the
/// verdict.
pub fn compare_to_reference(
    exchange: (f64, f64),
    reference: (f64, f64),
) -> SharpVerdict {
    let shortfall = |ex: f64, sharp: f64| {
        if sharp <= 1.0 {
            return 0.0;
        }
        // Positive when the exchange pays less than the sharp book.
        (sharp - ex) / sharp
    };
    let worst = shortfall(exchange.0, reference.0).max(shortfall(exchange.1, reference.1));

    if worst >= DISCREPANCY_RATIO {
        SharpVerdict::Discrepancy
    } else if worst >= CAUTION_RATIO {
        SharpVerdict::Caution
    } else {
        SharpVerdict::Ok
    }
}

/// Per-side name score: a shared last name is decisive, otherwise fall back
/// to whole-string similarity. Handles "Świątek I." against "Iga Swiatek".
fn side_score(a: &str, b: &str) -> f64 {
    if same_last_name(a, b) {
        1.0
    } else {
        similarity(a, b)
    }
}

/// Reference pair oriented to (p1, p2), if a confident match exists.
pub fn reference_odds_for(
    p1_name: &str,
    p2_name: &str,
    entries: &[SharpMatchOdds],
) -> Option<(f64, f64)> {
    let mut best: Option<(f64, (f64, f64))> = None;
    for entry in entries {
        let straight = side_score(p1_name, &entry.player1_name)
            .min(side_score(p2_name, &entry.player2_name));
        let crossed = side_score(p1_name, &entry.player2_name)
            .min(side_score(p2_name, &entry.player1_name));
        let (score, oriented) = if straight >= crossed {
            (straight, (entry.player1_odds, entry.player2_odds))
        } else {
            (crossed, (entry.player2_odds, entry.player1_odds))
        };
        if score >= NAME_MATCH_THRESHOLD && best.map_or(true, |(s, _)| score > s) {
            best = Some((score, oriented));
        }
    }
    best.map(|(_, oriented)| oriented)
}

// ---- aggregator wire types ----------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiEvent {
    home_team: String,
    away_team: String,
    #[serde(default)]
    bookmakers: Vec<ApiBookmaker>,
}

#[derive(Debug, Deserialize)]
struct ApiBookmaker {
    key: String,
    #[serde(default)]
    markets: Vec<ApiMarket>,
}

#[derive(Debug, Deserialize)]
struct ApiMarket {
    key: String,
    #[serde(default)]
    outcomes: Vec<ApiOutcome>,
}

#[derive(Debug, Deserialize)]
struct ApiOutcome {
    name: String,
    price: f64,
}

pub struct SharpOddsClient {
    client: Client,
    api_key: String,
    /// Preferred bookmaker key at the aggregator.
    bookmaker: String,
}

impl SharpOddsClient {
    pub fn new(api_key: String, timeout_seconds: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds.max(5)))
            .user_agent("CourtEdge/1.0 (Tennis Value Engine)")
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            api_key,
            bookmaker: "pinnacle".to_string(),
        })
    }

    /// All head-to-head tennis prices from the preferred book. Failures
    /// degrade to an empty list; the capture cycle proceeds unannotated.
    pub async fn fetch_tennis_odds(&self) -> Vec<SharpMatchOdds> {
        let mut all = Vec::new();
        for sport in SPORT_KEYS {
            match self.fetch_sport(sport).await {
                Ok(mut entries) => all.append(&mut entries),
                Err(e) => warn!("sharp odds fetch failed for {}: {}", sport, e),
            }
        }
        debug!("sharp reference: {} matchups", all.len());
        all
    }

    async fn fetch_sport(&self, sport: &str) -> Result<Vec<SharpMatchOdds>> {
        let url = format!("{}/sports/{}/odds", API_BASE, sport);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("apiKey", self.api_key.as_str()),
                ("regions", "eu"),
                ("markets", "h2h"),
                ("bookmakers", self.bookmaker.as_str()),
            ])
            .send()
            .await
            .context("sharp odds request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("sharp odds API error {}", response.status());
        }

        let events: Vec<ApiEvent> = response
            .json()
            .await
            .context("failed to parse sharp odds response")?;

        let mut out = Vec::new();
        for event in events {
            let Some(bookmaker) = event.bookmakers.iter().find(|b| b.key == self.bookmaker) else {
                continue;
            };
            let Some(market) = bookmaker.markets.iter().find(|m| m.key == "h2h") else {
                continue;
            };
            let p1 = market
                .outcomes
                .iter()
                .find(|o| o.name == event.home_team);
            let p2 = market
                .outcomes
                .iter()
                .find(|o| o.name == event.away_team);
            if let (Some(p1), Some(p2)) = (p1, p2) {
                out.push(SharpMatchOdds {
                    player1_name: event.home_team.clone(),
                    player2_name: event.away_team.clone(),
                    player1_odds: p1.price,
                    player2_odds: p2.price,
                });
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries() -> Vec<SharpMatchOdds> {
        vec![
            SharpMatchOdds {
                player1_name: "Carlos Alcaraz".into(),
                player2_name: "Novak Djokovic".into(),
                player1_odds: 1.70,
                player2_odds: 2.25,
            },
            SharpMatchOdds {
                player1_name: "Iga Swiatek".into(),
                player2_name: "Aryna Sabalenka".into(),
                player1_odds: 1.55,
                player2_odds: 2.50,
            },
        ]
    }

    #[test]
    fn finds_matchup_despite_order_and_diacritics() {
        let odds = reference_odds_for("Novak Djokovic", "Carlos Alcaraz", &entries()).unwrap();
        // Orientation follows the query order, so Djokovic's price is first.
        assert_eq!(odds, (2.25, 1.70));

        let odds = reference_odds_for("Świątek I.", "Sabalenka A.", &entries());
        assert!(odds.is_some());
    }

    #[test]
    fn unknown_matchup_yields_none() {
        assert!(reference_odds_for("Player A", "Player B", &entries()).is_none());
    }

    #[test]
    fn comparison_verdicts() {
        // Exchange pays better than the book on both sides.
        assert_eq!(compare_to_reference((1.80, 2.30), (1.70, 2.25)), SharpVerdict::Ok);
        // One side noticeably short.
        assert_eq!(
            compare_to_reference((1.55, 2.25), (1.70, 2.25)),
            SharpVerdict::Caution
        );
        // One side drastically short.
        assert_eq!(
            compare_to_reference((1.40, 2.25), (1.70, 2.25)),
            SharpVerdict::Discrepancy
        );
    }
}
