//! ACE trading loop runner.
//!
//! One process, one cycle: the scheduler (cron) runs `acetrade daily` every
//! trading day and `acetrade weekly` at week's end with non-overlapping
//! windows, so at most one run contends for the state store.

use acetrade::application::curator::Curator;
use acetrade::application::daily_cycle::{CycleDeps, DailyCycle};
use acetrade::application::weekly_cycle::WeeklyCycle;
use acetrade::config::{Config, Mode};
use acetrade::domain::ports::{LlmClient, MarketDataProvider, Notifier, StateBundleStore};
use acetrade::infrastructure::gemini::GeminiClient;
use acetrade::infrastructure::mock::{MockLlmClient, MockMarketDataProvider};
use acetrade::infrastructure::oanda::OandaMarketDataProvider;
use acetrade::infrastructure::state_sync::{LocalBundleStore, StateSynchronizer};
use acetrade::infrastructure::telegram::{LogNotifier, TelegramNotifier};
use acetrade::infrastructure::PlaybookStore;
use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Self-evolving playbook trading research loop (not financial advice)",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daily cycle: plan, replay, persist, publish
    Daily,
    /// Run the weekly cycle: daily (if unrun), reflect, curate, publish
    Weekly,
    /// Validate the current playbook and print any invariant violations
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let now = chrono::Utc::now();

    match cli.command {
        Commands::Daily => {
            let (deps, sync) = build(&config)?;
            let outcome = DailyCycle::new(deps, sync).run(now).await?;
            info!(
                "Daily cycle done: {} plan, {:?} ({} pips), bundle {}",
                outcome.plan.bias,
                outcome.log.execution.outcome,
                outcome.log.execution.pnl_pips,
                outcome.bundle_key
            );
            if !outcome.events.is_empty() {
                info!("Cycle degraded in {} stage(s)", outcome.events.len());
            }
        }
        Commands::Weekly => {
            let (deps, sync) = build(&config)?;
            let curator = Curator::new(config.prune_min_harmful, config.prune_harmful_margin);
            let outcome = WeeklyCycle::new(deps, sync, curator, config.max_insights)
                .run(now)
                .await?;
            info!(
                "Weekly cycle done: {} insights, curated: {}, bundle {}",
                outcome.report.insights.len(),
                outcome.curated,
                outcome.bundle_key
            );
        }
        Commands::Validate => {
            let store = PlaybookStore::new(&config.paths());
            let loaded = store.load(now)?;
            let violations = PlaybookStore::validate(&loaded.playbook);
            if violations.is_empty() {
                info!(
                    "Playbook v{} is valid ({} entries)",
                    loaded.playbook.metadata.version, loaded.playbook.metadata.total_entries
                );
            } else {
                for violation in &violations {
                    error!("{}", violation);
                }
                anyhow::bail!("{} invariant violation(s)", violations.len());
            }
        }
    }

    Ok(())
}

type BuiltDeps = (Arc<CycleDeps>, Arc<StateSynchronizer>);

fn build(config: &Config) -> Result<BuiltDeps> {
    let (market_data, llm, notifier): (
        Arc<dyn MarketDataProvider>,
        Arc<dyn LlmClient>,
        Arc<dyn Notifier>,
    ) = match config.mode {
        Mode::Mock => {
            info!("Mode: mock (deterministic synthetic data, canned model)");
            let base_price = Decimal::new(10845, 4);
            (
                Arc::new(MockMarketDataProvider::new(config.pair.clone(), base_price)),
                Arc::new(MockLlmClient::with_canned_plan(base_price)),
                Arc::new(LogNotifier),
            )
        }
        Mode::Live => {
            info!("Mode: live ({} via Gemini {})", config.pair, config.gemini_model);
            let notifier: Arc<dyn Notifier> = match (
                config.telegram_bot_token.clone(),
                config.telegram_chat_id.clone(),
            ) {
                (Some(token), Some(chat_id)) => Arc::new(TelegramNotifier::new(
                    token,
                    chat_id,
                    config.data_timeout_secs,
                )),
                _ => Arc::new(LogNotifier),
            };
            (
                Arc::new(OandaMarketDataProvider::new(
                    config.oanda_api_base_url.clone(),
                    config.oanda_api_key.clone(),
                    config.pair.clone(),
                    config.pip_scale(),
                    Vec::new(),
                    config.data_timeout_secs,
                )),
                Arc::new(GeminiClient::new(
                    config.gemini_base_url.clone(),
                    config.gemini_model.clone(),
                    config.gemini_api_key.clone(),
                    config.llm_timeout_secs,
                )),
                notifier,
            )
        }
    };

    let bundle_store: Arc<dyn StateBundleStore> =
        Arc::new(LocalBundleStore::new(config.bundle_dir.clone()));

    let run_token = std::env::var("RUN_NUMBER")
        .unwrap_or_else(|_| uuid::Uuid::new_v4().simple().to_string()[..8].to_string());

    let sync = Arc::new(StateSynchronizer::new(
        bundle_store,
        config.paths(),
        config.bundle_retention_days,
        run_token,
    ));

    let deps = Arc::new(CycleDeps {
        market_data,
        llm,
        notifier,
        generation: config.generation_config(),
        paths: config.paths(),
        session_window: config.session_window(),
        pip_scale: config.pip_scale(),
    });

    Ok((deps, sync))
}
