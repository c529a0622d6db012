//! Webhook alerts.
//!
//! Rich-embed messages for bet placement, a bet's match going live, and
//! settlement. Fire-and-forget with a short timeout; a dead webhook never
//! disturbs the engine.

use crate::models::{Bet, BetResult};
use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

const COLOR_INFO: u32 = 0x3498db;
const COLOR_WIN: u32 = 0x22c55e;
const COLOR_LOSS: u32 = 0xef4444;
const COLOR_VOID: u32 = 0x6b7280;

const FOOTER: &str = "CourtEdge Tennis Monitor";

pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
}

impl WebhookNotifier {
    pub fn new(webhook_url: String, timeout_seconds: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds.max(5)))
            .user_agent("CourtEdge/1.0 (Tennis Value Engine)")
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            webhook_url,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.webhook_url.starts_with("http")
    }

    async fn post_embed(&self, embed: serde_json::Value) -> bool {
        if !self.is_configured() {
            return false;
        }
        let payload = json!({ "embeds": [embed] });
        match self.client.post(&self.webhook_url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!("webhook rejected alert: {}", response.status());
                false
            }
            Err(e) => {
                warn!("webhook alert failed: {}", e);
                false
            }
        }
    }

    pub async fn bet_placed(&self, bet: &Bet) -> bool {
        let embed = json!({
            "title": format!("NEW BET: {}", bet.match_description),
            "color": COLOR_INFO,
            "fields": [
                { "name": "Selection", "value": bet.selection, "inline": true },
                { "name": "Odds", "value": format!("{:.2}", bet.odds), "inline": true },
                { "name": "Stake", "value": format!("{:.1}u", bet.stake), "inline": true },
                { "name": "Model", "value": bet.model.as_str(), "inline": true },
            ],
            "footer": { "text": FOOTER },
            "timestamp": Utc::now().to_rfc3339(),
        });
        let sent = self.post_embed(embed).await;
        if sent {
            debug!("webhook: placement alert for '{}'", bet.selection);
        }
        sent
    }

    pub async fn bet_live(&self, bet: &Bet) -> bool {
        let embed = json!({
            "title": format!("LIVE: {}", bet.match_description),
            "color": COLOR_INFO,
            "fields": [
                { "name": "Selection", "value": bet.selection, "inline": true },
                { "name": "Odds", "value": format!("{:.2}", bet.odds), "inline": true },
                { "name": "Stake", "value": format!("{:.1}u", bet.stake), "inline": true },
            ],
            "footer": { "text": FOOTER },
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.post_embed(embed).await
    }

    pub async fn bet_settled(&self, bet: &Bet, result: BetResult, profit_loss: f64) -> bool {
        let (color, pl_str) = match result {
            BetResult::Win => (COLOR_WIN, format!("+{:.2}u", profit_loss)),
            BetResult::Loss => (COLOR_LOSS, format!("{:.2}u", profit_loss)),
            BetResult::Void => (COLOR_VOID, "0.00u".to_string()),
        };
        let embed = json!({
            "title": format!("{}: {}", result.as_str().to_uppercase(), bet.match_description),
            "color": color,
            "fields": [
                { "name": "Selection", "value": bet.selection, "inline": true },
                { "name": "Odds", "value": format!("{:.2}", bet.odds), "inline": true },
                { "name": "P/L", "value": format!("**{}**", pl_str), "inline": true },
            ],
            "footer": { "text": FOOTER },
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.post_embed(embed).await
    }
}
