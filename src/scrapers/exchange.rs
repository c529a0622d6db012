//! Betting-exchange REST client.
//!
//! Session-token login, market catalogue listing for tennis match-odds
//! markets, and market books in batches of at most forty ids (the upstream
//! hard cap). Transient failures retry with exponential backoff.

use crate::config::ExchangeCredentials;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

const LOGIN_URL: &str = "https://identitysso.betfair.com/api/login";
const API_URL: &str = "https://api.betfair.com/exchange/betting/rest/v1.0/";

/// Tennis event type on the exchange.
const TENNIS_EVENT_TYPE_ID: &str = "2";
const MATCH_ODDS_MARKET: &str = "MATCH_ODDS";

/// Upstream limit on market-book ids per request.
pub const MAX_BOOK_BATCH: usize = 40;
/// Pause between batched requests.
const BATCH_SLEEP_MS: u64 = 200;

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 250;

// ---- wire types ---------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerCatalog {
    pub selection_id: i64,
    pub runner_name: String,
    #[serde(default)]
    pub sort_priority: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetitionInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketCatalogueEntry {
    pub market_id: String,
    #[serde(default)]
    pub market_name: Option<String>,
    #[serde(default)]
    pub market_start_time: Option<String>,
    #[serde(default)]
    pub event: Option<EventInfo>,
    #[serde(default)]
    pub competition: Option<CompetitionInfo>,
    #[serde(default)]
    pub runners: Vec<RunnerCatalog>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSize {
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangePrices {
    #[serde(default)]
    pub available_to_back: Vec<PriceSize>,
    #[serde(default)]
    pub available_to_lay: Vec<PriceSize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerBook {
    pub selection_id: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub total_matched: Option<f64>,
    #[serde(default)]
    pub ex: Option<ExchangePrices>,
}

impl RunnerBook {
    pub fn best_back(&self) -> Option<&PriceSize> {
        self.ex.as_ref()?.available_to_back.first()
    }

    pub fn is_winner(&self) -> bool {
        self.status.as_deref() == Some("WINNER")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketBook {
    pub market_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub inplay: bool,
    #[serde(default)]
    pub total_matched: Option<f64>,
    #[serde(default)]
    pub runners: Vec<RunnerBook>,
}

impl MarketBook {
    pub fn is_closed(&self) -> bool {
        self.status.as_deref() == Some("CLOSED")
    }

    pub fn winner_selection_id(&self) -> Option<i64> {
        self.runners
            .iter()
            .find(|r| r.is_winner())
            .map(|r| r.selection_id)
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

// ---- contract -----------------------------------------------------------

/// Everything the engine needs from an exchange. The production client talks
/// REST; tests substitute a scripted implementation.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    async fn login(&self) -> Result<()>;

    /// Match-odds markets starting within the window, with runner catalogue.
    async fn list_match_odds_markets(&self, hours_ahead: u32) -> Result<Vec<MarketCatalogueEntry>>;

    /// Current books for the given market ids (any count; the client
    /// batches).
    async fn list_market_books(&self, market_ids: &[String]) -> Result<Vec<MarketBook>>;

    /// Text search for match-odds markets, used by settlement to relocate a
    /// bet's market by player name.
    async fn search_markets(&self, text_query: &str) -> Result<Vec<MarketCatalogueEntry>>;
}

// ---- REST implementation ------------------------------------------------

pub struct BetfairStyleClient {
    client: Client,
    credentials: ExchangeCredentials,
    session_token: Mutex<Option<String>>,
}

impl BetfairStyleClient {
    pub fn new(credentials: ExchangeCredentials, timeout_seconds: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds.max(5)))
            .user_agent("CourtEdge/1.0 (Tennis Value Engine)")
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            credentials,
            session_token: Mutex::new(None),
        })
    }

    fn token(&self) -> Option<String> {
        self.session_token.lock().clone()
    }

    /// POST one API endpoint with retry and backoff. A 401 clears the
    /// session so the next attempt logs in again.
    async fn api_request(&self, endpoint: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let mut backoff = INITIAL_BACKOFF_MS;

        for attempt in 0..MAX_RETRIES {
            if self.token().is_none() {
                self.login().await?;
            }
            let token = self.token().unwrap_or_default();
            let url = format!("{}{}/", API_URL, endpoint);

            let request = self
                .client
                .post(&url)
                .header("X-Application", &self.credentials.app_key)
                .header("X-Authentication", token)
                .json(&body);

            match timeout(Duration::from_secs(30), request.send()).await {
                Ok(Ok(response)) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<serde_json::Value>()
                            .await
                            .context("failed to parse exchange response");
                    }
                    if status.as_u16() == 401 {
                        warn!("session expired, re-authenticating");
                        *self.session_token.lock() = None;
                    } else {
                        let text = response.text().await.unwrap_or_default();
                        warn!("exchange API error {} on {}: {}", status, endpoint, text);
                    }
                }
                Ok(Err(e)) => warn!("exchange request failed (attempt {}): {}", attempt + 1, e),
                Err(_) => warn!("exchange request timeout (attempt {})", attempt + 1),
            }

            if attempt < MAX_RETRIES - 1 {
                sleep(Duration::from_millis(backoff)).await;
                backoff = (backoff * 2).min(10_000);
            }
        }

        bail!("exchange unavailable: max retries exceeded for {}", endpoint)
    }

    fn market_filter(hours_ahead: u32) -> serde_json::Value {
        let now = Utc::now();
        let to = now + ChronoDuration::hours(hours_ahead as i64);
        json!({
            "eventTypeIds": [TENNIS_EVENT_TYPE_ID],
            "marketTypeCodes": [MATCH_ODDS_MARKET],
            "marketStartTime": {
                "from": now.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                "to": to.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            }
        })
    }
}

#[async_trait]
impl ExchangeApi for BetfairStyleClient {
    async fn login(&self) -> Result<()> {
        if !self.credentials.is_configured() {
            bail!("exchange credentials not configured");
        }

        let response = self
            .client
            .post(LOGIN_URL)
            .header("X-Application", &self.credentials.app_key)
            .header("Accept", "application/json")
            .form(&[
                ("username", self.credentials.username.as_str()),
                ("password", self.credentials.password.as_str()),
            ])
            .send()
            .await
            .context("exchange login request failed")?;

        let login: LoginResponse = response
            .json()
            .await
            .context("failed to parse login response")?;

        if login.status.as_deref() == Some("SUCCESS") {
            *self.session_token.lock() = login.token;
            debug!("exchange login successful");
            Ok(())
        } else {
            bail!(
                "exchange login failed: {}",
                login.error.unwrap_or_else(|| "unknown error".into())
            )
        }
    }

    async fn list_match_odds_markets(&self, hours_ahead: u32) -> Result<Vec<MarketCatalogueEntry>> {
        let body = json!({
            "filter": Self::market_filter(hours_ahead),
            "marketProjection": ["RUNNER_DESCRIPTION", "MARKET_START_TIME", "EVENT", "COMPETITION"],
            "maxResults": "1000",
            "sort": "FIRST_TO_START",
        });
        let raw = self.api_request("listMarketCatalogue", body).await?;
        let markets: Vec<MarketCatalogueEntry> =
            serde_json::from_value(raw).context("failed to parse market catalogue")?;
        debug!("fetched {} match-odds markets", markets.len());
        Ok(markets)
    }

    async fn list_market_books(&self, market_ids: &[String]) -> Result<Vec<MarketBook>> {
        let mut books = Vec::with_capacity(market_ids.len());

        for batch in market_ids.chunks(MAX_BOOK_BATCH) {
            let body = json!({
                "marketIds": batch,
                "priceProjection": { "priceData": ["EX_BEST_OFFERS"], "virtualise": true },
            });
            let raw = self.api_request("listMarketBook", body).await?;
            let mut parsed: Vec<MarketBook> =
                serde_json::from_value(raw).context("failed to parse market books")?;
            books.append(&mut parsed);

            if batch.len() == MAX_BOOK_BATCH {
                sleep(Duration::from_millis(BATCH_SLEEP_MS)).await;
            }
        }

        Ok(books)
    }

    async fn search_markets(&self, text_query: &str) -> Result<Vec<MarketCatalogueEntry>> {
        let body = json!({
            "filter": {
                "eventTypeIds": [TENNIS_EVENT_TYPE_ID],
                "marketTypeCodes": [MATCH_ODDS_MARKET],
                "textQuery": text_query,
            },
            "marketProjection": ["RUNNER_DESCRIPTION", "EVENT"],
            "maxResults": "100",
        });
        let raw = self.api_request("listMarketCatalogue", body).await?;
        let markets: Vec<MarketCatalogueEntry> =
            serde_json::from_value(raw).context("failed to parse market search")?;
        Ok(markets)
    }
}
