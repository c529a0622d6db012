//! Cloud mirror for pending bets.
//!
//! REST upserts against a hosted Postgres-over-HTTP store so the phone-side
//! monitor can watch bet state. Strictly best-effort: any failure is logged
//! and the local write is never blocked.

use crate::models::Bet;
use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

pub struct CloudMirror {
    client: Client,
    base_url: String,
    api_key: String,
}

impl CloudMirror {
    pub fn new(base_url: String, api_key: String, timeout_seconds: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds.max(5)))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && !self.api_key.is_empty()
    }

    async fn request(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        body: Option<serde_json::Value>,
        upsert: bool,
    ) -> bool {
        if !self.is_configured() {
            return false;
        }
        let url = format!("{}/rest/v1/{}", self.base_url, endpoint);
        let prefer = if upsert {
            "return=representation,resolution=merge-duplicates"
        } else {
            "return=representation"
        };

        let mut request = self
            .client
            .request(method, &url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Prefer", prefer);
        if let Some(body) = body {
            request = request.json(&body);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                warn!("cloud mirror error {}: {}", status, text);
                false
            }
            Err(e) => {
                warn!("cloud mirror request failed: {}", e);
                false
            }
        }
    }

    /// Upsert the full bet row, keyed by local bet id.
    pub async fn sync_bet(&self, bet: &Bet) -> bool {
        let Some(id) = bet.id else {
            return false;
        };
        let body = json!({
            "id": id,
            "match_date": bet.match_date,
            "tournament": bet.tournament,
            "match_description": bet.match_description,
            "selection": bet.selection,
            "odds": bet.odds,
            "stake": bet.stake,
            "model": bet.model.as_str(),
            "our_probability": bet.our_probability,
            "result": bet.result.map(|r| r.as_str()),
            "profit_loss": bet.profit_loss,
            "is_live": bet.is_live,
            "updated_at": Utc::now().to_rfc3339(),
        });
        let ok = self
            .request(
                reqwest::Method::POST,
                "pending_bets?on_conflict=id",
                Some(body),
                true,
            )
            .await;
        if ok {
            debug!("cloud mirror: synced bet {}", id);
        }
        ok
    }

    /// Flip the live flag when the bet's match goes in-play.
    pub async fn mark_bet_live(&self, bet_id: i64) -> bool {
        let body = json!({ "is_live": true, "updated_at": Utc::now().to_rfc3339() });
        self.request(
            reqwest::Method::PATCH,
            &format!("pending_bets?id=eq.{}", bet_id),
            Some(body),
            false,
        )
        .await
    }

    /// Record the final result.
    pub async fn mark_bet_finished(&self, bet_id: i64, result: &str, profit_loss: f64) -> bool {
        let body = json!({
            "result": result,
            "profit_loss": profit_loss,
            "is_live": false,
            "finished_at": Utc::now().to_rfc3339(),
        });
        self.request(
            reqwest::Method::PATCH,
            &format!("pending_bets?id=eq.{}", bet_id),
            Some(body),
            false,
        )
        .await
    }

    /// Remove a bet deleted locally.
    pub async fn delete_bet(&self, bet_id: i64) -> bool {
        self.request(
            reqwest::Method::DELETE,
            &format!("pending_bets?id=eq.{}", bet_id),
            None,
            false,
        )
        .await
    }
}

/// Encode a bet the way the mirror stores it; used to verify round-trips.
pub fn bet_to_cloud_payload(bet: &Bet) -> serde_json::Value {
    json!({
        "id": bet.id,
        "match_date": bet.match_date,
        "tournament": bet.tournament,
        "match_description": bet.match_description,
        "selection": bet.selection,
        "odds": bet.odds,
        "stake": bet.stake,
        "model": bet.model.as_str(),
        "our_probability": bet.our_probability,
        "result": bet.result.map(|r| r.as_str()),
        "profit_loss": bet.profit_loss,
    })
}

/// Decode a mirror payload back into the fields the engine cares about.
pub fn bet_from_cloud_payload(payload: &serde_json::Value) -> Option<Bet> {
    let mut bet = Bet::new(
        payload.get("match_date")?.as_str()?.to_string(),
        payload.get("tournament")?.as_str()?.to_string(),
        payload.get("match_description")?.as_str()?.to_string(),
        payload.get("selection")?.as_str()?.to_string(),
        payload.get("odds")?.as_f64()?,
        payload.get("stake")?.as_f64()?,
    );
    bet.id = payload.get("id").and_then(|v| v.as_i64());
    bet.model = crate::models::BetModel::parse(
        payload.get("model").and_then(|v| v.as_str()).unwrap_or(""),
    );
    bet.our_probability = payload.get("our_probability").and_then(|v| v.as_f64());
    bet.result = payload
        .get("result")
        .and_then(|v| v.as_str())
        .and_then(crate::models::BetResult::parse);
    bet.profit_loss = payload.get("profit_loss").and_then(|v| v.as_f64());
    Some(bet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BetModel, BetResult};

    #[test]
    fn cloud_payload_round_trips() {
        let mut bet = Bet::new(
            "2026-02-01",
            "Australian Open",
            "Alpha One vs Beta Two",
            "Alpha One",
            1.8,
            2.0,
        );
        bet.id = Some(7);
        bet.model = BetModel::Favorite;
        bet.our_probability = Some(0.64);
        bet.result = Some(BetResult::Win);
        bet.profit_loss = Some(1.52);

        let decoded = bet_from_cloud_payload(&bet_to_cloud_payload(&bet)).unwrap();
        assert_eq!(decoded.id, bet.id);
        assert_eq!(decoded.selection, bet.selection);
        assert_eq!(decoded.odds, bet.odds);
        assert_eq!(decoded.model, bet.model);
        assert_eq!(decoded.result, bet.result);
        assert_eq!(decoded.profit_loss, bet.profit_loss);
    }

    #[test]
    fn unconfigured_mirror_declines_writes() {
        let mirror = CloudMirror::new(String::new(), String::new(), 10).unwrap();
        assert!(!mirror.is_configured());
    }
}
