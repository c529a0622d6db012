//! CourtEdge - tennis match-winner value engine.
//!
//! Captures exchange odds, estimates true win probabilities from historical
//! results, surfaces positive-EV bets with Kelly staking, and settles placed
//! bets against market outcomes.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};

use courtedge_backend::analysis::MatchAnalyzer;
use courtedge_backend::cloud::CloudMirror;
use courtedge_backend::config::Config;
use courtedge_backend::elo::PerformanceEloCalculator;
use courtedge_backend::models::{CompletedMatchRecord, Surface};
use courtedge_backend::notify::WebhookNotifier;
use courtedge_backend::resolver::{MappingNameResolver, NameResolver};
use courtedge_backend::scrapers::capture::OddsCapture;
use courtedge_backend::scrapers::exchange::{BetfairStyleClient, ExchangeApi};
use courtedge_backend::scrapers::results::ResultsIngestor;
use courtedge_backend::scrapers::sharp::SharpOddsClient;
use courtedge_backend::settle::BetSettler;
use courtedge_backend::store::{open_store, TennisStore};
use courtedge_backend::suggest::BetSuggester;
use courtedge_backend::tasks;

#[derive(Parser)]
#[command(name = "courtedge", about = "Tennis match-winner value engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the capture and settlement loops until interrupted.
    Run {
        /// Auto-place suggested bets into the tracker.
        #[arg(long)]
        auto: bool,
    },
    /// One capture cycle: fetch markets and refresh upcoming matches.
    Capture,
    /// Analyze captured markets and print value-bet candidates.
    Suggest,
    /// One settlement sweep over pending bets.
    Settle,
    /// Recompute the rolling Performance Elo and per-tour ranks.
    RefreshElo,
    /// Import completed matches from a JSON file of results.
    ImportResults {
        /// Path to a JSON array of completed-match records.
        #[arg(long)]
        file: std::path::PathBuf,
    },
    /// Analyze a single matchup.
    Analyze {
        player1: String,
        player2: String,
        #[arg(long, default_value = "Hard")]
        surface: String,
    },
    /// Re-derive strategy models for historical bets missing one.
    BackfillModels,
    /// Show store counts and betting performance.
    Stats,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn build_exchange(config: &Config) -> Result<Arc<dyn ExchangeApi>> {
    if !config.exchange.is_configured() {
        bail!(
            "exchange credentials not configured; set EXCHANGE_APP_KEY / \
             EXCHANGE_USERNAME / EXCHANGE_PASSWORD or fill in credentials.json"
        );
    }
    let client = BetfairStyleClient::new(config.exchange.clone(), config.http_timeout_seconds)?;
    Ok(Arc::new(client))
}

fn build_notifier(config: &Config) -> Option<Arc<WebhookNotifier>> {
    let url = config.webhook_url.clone()?;
    match WebhookNotifier::new(url, config.http_timeout_seconds) {
        Ok(notifier) => Some(Arc::new(notifier)),
        Err(e) => {
            warn!("webhook notifier disabled: {}", e);
            None
        }
    }
}

fn build_cloud(config: &Config) -> Option<Arc<CloudMirror>> {
    let (url, key) = (config.cloud_url.clone()?, config.cloud_key.clone()?);
    match CloudMirror::new(url, key, config.http_timeout_seconds) {
        Ok(mirror) => Some(Arc::new(mirror)),
        Err(e) => {
            warn!("cloud mirror disabled: {}", e);
            None
        }
    }
}

fn build_sharp(config: &Config) -> Option<Arc<SharpOddsClient>> {
    let key = config.sharp_odds_api_key.clone()?;
    match SharpOddsClient::new(key, config.http_timeout_seconds) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            warn!("sharp odds client disabled: {}", e);
            None
        }
    }
}

fn resolve_player_id(
    store: &TennisStore,
    resolver: &dyn NameResolver,
    name: &str,
) -> Result<i64> {
    let candidates: Vec<_> = store
        .search_players(name, 20)?
        .into_iter()
        .map(|p| courtedge_backend::resolver::NameCandidate {
            id: p.id,
            name: p.name,
        })
        .collect();
    resolver
        .resolve(name, None, &candidates)
        .with_context(|| format!("no rostered player matches '{}'", name))
}

async fn run_engine(config: Config, auto: bool) -> Result<()> {
    let store = open_store(&config.database_path)?;
    let resolver: Arc<dyn NameResolver> =
        Arc::new(MappingNameResolver::load(&config.name_mappings_path));
    let exchange = build_exchange(&config)?;
    let notifier = build_notifier(&config);
    let cloud = build_cloud(&config);
    let sharp = build_sharp(&config);

    exchange.login().await.context("initial exchange login failed")?;

    let capture = Arc::new(OddsCapture::new(
        store.clone(),
        exchange.clone(),
        sharp,
        resolver,
        config.clone(),
    ));
    let settler = Arc::new(BetSettler::new(
        store.clone(),
        exchange,
        notifier.clone(),
        cloud.clone(),
        &config,
    ));

    let (control, shutdown_rx, auto_rx) = tasks::EngineControl::new(auto || config.auto_mode);

    let capture_handle = tokio::spawn(tasks::capture_polling(
        capture,
        store.clone(),
        config.clone(),
        notifier,
        cloud,
        auto_rx,
        shutdown_rx.clone(),
    ));
    let settlement_handle = tokio::spawn(tasks::settlement_polling(
        settler,
        config.clone(),
        shutdown_rx.clone(),
    ));
    let housekeeping_handle =
        tokio::spawn(tasks::housekeeping_polling(store.clone(), shutdown_rx));

    info!("engine running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await.context("signal handler failed")?;
    info!("shutdown requested");
    control.stop();

    let _ = capture_handle.await;
    let _ = settlement_handle.await;
    let _ = housekeeping_handle.await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Run { auto } => run_engine(config, auto).await?,

        Command::Capture => {
            let store = open_store(&config.database_path)?;
            let resolver: Arc<dyn NameResolver> =
                Arc::new(MappingNameResolver::load(&config.name_mappings_path));
            let exchange = build_exchange(&config)?;
            exchange.login().await?;
            let capture = OddsCapture::new(
                store,
                exchange,
                build_sharp(&config),
                resolver,
                config.clone(),
            );
            let summary = capture.capture_cycle().await?;
            println!(
                "{} markets found, {} captured ({} in-play, {} without odds)",
                summary.markets_found,
                summary.captured,
                summary.skipped_inplay,
                summary.skipped_no_odds
            );
        }

        Command::Suggest => {
            let store = open_store(&config.database_path)?;
            let suggester = BetSuggester::new(&store, &config);
            let candidates = suggester.suggest()?;
            if candidates.is_empty() {
                println!("no value bets in the current capture");
            }
            for c in &candidates {
                println!(
                    "[{}] {} @ {:.2} | {} | our {:.1}% vs implied {:.1}% | EV {:+.1}% | {:.1}u",
                    c.model.as_str(),
                    c.selection,
                    c.odds,
                    c.match_description,
                    c.our_probability * 100.0,
                    c.implied_probability * 100.0,
                    c.expected_value * 100.0,
                    c.recommended_units
                );
            }
        }

        Command::Settle => {
            let store = open_store(&config.database_path)?;
            let exchange = build_exchange(&config)?;
            exchange.login().await?;
            let settler = BetSettler::new(
                store,
                exchange,
                build_notifier(&config),
                build_cloud(&config),
                &config,
            );
            let summary = settler.settle_pending().await?;
            println!(
                "{} pending checked: {} settled, {} live, {} still open, {} not found",
                summary.checked,
                summary.settled,
                summary.went_live,
                summary.still_open,
                summary.not_found
            );
        }

        Command::RefreshElo => {
            let store = open_store(&config.database_path)?;
            let calculator = PerformanceEloCalculator::new(&store)
                .with_window_months(config.rolling_window_months);
            let updated = calculator.recalculate_all(Utc::now().date_naive())?;
            store.record_refresh("full")?;
            println!("performance elo updated for {} players", updated);
        }

        Command::ImportResults { file } => {
            let store = open_store(&config.database_path)?;
            let resolver: Arc<dyn NameResolver> =
                Arc::new(MappingNameResolver::load(&config.name_mappings_path));
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("cannot read {}", file.display()))?;
            let records: Vec<CompletedMatchRecord> =
                serde_json::from_str(&raw).context("results file is not a valid record array")?;
            let ingestor = ResultsIngestor::new(store.clone(), resolver);
            let summary = ingestor.ingest(&records)?;
            store.record_refresh("full")?;
            println!(
                "{} fetched: {} inserted, {} duplicate, {} rejected, {} unresolved",
                summary.fetched,
                summary.inserted,
                summary.duplicates,
                summary.rejected,
                summary.unresolved
            );
        }

        Command::Analyze {
            player1,
            player2,
            surface,
        } => {
            let store = open_store(&config.database_path)?;
            let resolver = MappingNameResolver::load(&config.name_mappings_path);
            let surface = Surface::parse(&surface)
                .with_context(|| format!("unknown surface '{}'", surface))?;
            let p1 = resolve_player_id(&store, &resolver, &player1)?;
            let p2 = resolve_player_id(&store, &resolver, &player2)?;

            let analyzer = MatchAnalyzer::new(&store);
            let result = analyzer.calculate_win_probability(p1, p2, surface)?;
            println!(
                "{} {:.1}% - {:.1}% {}  (advantage {:+.3})",
                player1,
                result.p1_probability * 100.0,
                result.p2_probability * 100.0,
                player2,
                result.weighted_advantage
            );
            for factor in &result.factors {
                println!(
                    "  {:>16}  w={:.2}  adv={:+.3}",
                    factor.name, factor.weight, factor.advantage
                );
            }
        }

        Command::BackfillModels => {
            let store = open_store(&config.database_path)?;
            let updated = store.backfill_model_tags()?;
            println!("backfilled {} bets", updated);
        }

        Command::Stats => {
            let store = open_store(&config.database_path)?;
            let (wins, losses, voids, pnl) = store.bet_performance()?;
            println!("players:    {}", store.player_count()?);
            println!("matches:    {}", store.match_count()?);
            println!("upcoming:   {}", store.upcoming_count()?);
            println!("tournaments:{}", store.tournament_count()?);
            println!("bets:       {}W-{}L-{}V, net {:+.2}u", wins, losses, voids, pnl);
            if let Some(ts) = store.last_refresh("quick")? {
                println!("last capture: {}", ts);
            }
            if let Some(ts) = store.last_refresh("full")? {
                println!("last full refresh: {}", ts);
            }
        }
    }

    Ok(())
}
