//! SUPERFECTA: pari-mutuel superfecta decision engine
//!
//! Entry point. Loads configuration, initialises structured logging, wires
//! the data source, store and wagering provider, and runs exactly one
//! command per invocation. Stages are triggered externally (cron or a
//! scheduler), so nothing here loops.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use superfecta::config::AppConfig;
use superfecta::data::cache::CachedRaceSource;
use superfecta::data::snapshot::SnapshotSource;
use superfecta::data::{GuardedRaceSource, RaceDataSource};
use superfecta::engine::{LifecycleConfig, LifecycleManager};
use superfecta::platforms::paper::PaperWagering;
use superfecta::platforms::tote::ToteClient;
use superfecta::platforms::{WagerMode, WageringProvider};
use superfecta::resilience::{GuardedWagering, ProviderGuard};
use superfecta::storage::{RecommendationStore, SqliteStore};
use superfecta::strategy::optimizer::StakingOptimizer;
use superfecta::strategy::viability::{
    alpha_min, break_even_others_pool, coverage_grid, total_lines, PoolParams,
};
use superfecta::strategy::Planner;

#[derive(Parser)]
#[command(name = "superfecta", version, about = "Pari-mutuel superfecta decision engine")]
struct Cli {
    /// Configuration file.
    #[arg(long, global = true, default_value = "config.toml", env = "SUPERFECTA_CONFIG")]
    config: String,

    /// JSON race snapshot serving candidates and race contexts.
    #[arg(long, global = true, env = "SUPERFECTA_SNAPSHOT")]
    snapshot: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Morning Scan: create recommendations for the day's products.
    Scan {
        /// Run date (defaults to today, UTC).
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Live Monitor: re-evaluate every live recommendation.
    Monitor,
    /// Execute: place every ready recommendation.
    Execute {
        /// Place bets even if `execution.auto_place` is off.
        #[arg(long)]
        auto_place: bool,
    },
    /// Print the staking plan and EV grid for one product.
    Plan {
        #[arg(long)]
        product: String,
        #[arg(long)]
        preset: Option<String>,
    },
    /// Print the uniform-probability coverage grid for a pool.
    Viability {
        #[arg(long)]
        runners: usize,
        #[arg(long, default_value_t = 4)]
        arity: usize,
        #[arg(long)]
        stake_per_line: f64,
        #[arg(long)]
        others: f64,
        #[arg(long)]
        takeout: f64,
        #[arg(long, default_value_t = 0.0)]
        rollover: f64,
        #[arg(long, default_value_t = 1.0)]
        multiplier: f64,
        #[arg(long, default_value_t = 10)]
        steps: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    let cfg = AppConfig::load(&cli.config)?;

    init_logging();

    match cli.command {
        Command::Viability {
            runners,
            arity,
            stake_per_line,
            others,
            takeout,
            rollover,
            multiplier,
            steps,
        } => {
            let params = PoolParams {
                others_pool: others,
                takeout,
                rollover,
                multiplier,
                self_in_pool: cfg.engine.self_in_pool,
                f_share_override: cfg.engine.f_share_override,
            };
            print_viability(&params, runners, arity, stake_per_line, steps);
        }
        Command::Plan { product, preset } => {
            let guard = ProviderGuard::from_config(&cfg.providers);
            let source = build_source(&cfg, cli.snapshot.as_ref(), guard)?;
            let planner = build_planner(&cfg);
            let race = source.race_context(&product).await?;
            let preset = preset.unwrap_or_else(|| cfg.engine.default_preset.clone());
            let opt = planner.optimize(&race, &preset, cfg.engine.tote_bank)?;

            println!(
                "{} ({}) | {} runners | {}",
                race.event_name,
                race.product_id,
                race.runners.len(),
                race.product_status
            );
            println!("{}", opt.plan);
            if let Some(adj) = &opt.plan.adjustment {
                println!(
                    "adjusted: concentration {:.2} -> {:.2}, inefficiency {:.2} -> {:.2} (adopted: {})",
                    adj.concentration_before,
                    adj.concentration_after,
                    adj.market_inefficiency_before,
                    adj.market_inefficiency_after,
                    adj.adopted
                );
            }
            for line in &opt.plan.lines {
                println!(
                    "  #{:<4} {:<14} p={:.5} stake={:>7.2} others={:>8.2} f={:.3}",
                    line.line.rank,
                    line.line.selection(),
                    line.line.probability,
                    line.stake,
                    line.others_estimate,
                    line.f_share
                );
            }
            println!("\n{:>6} {:>8} {:>10} {:>10}", "lines", "hit", "ER", "EP");
            for s in &opt.ev_grid {
                println!(
                    "{:>6} {:>7.2}% {:>10.2} {:>10.2}",
                    s.lines_covered,
                    s.hit_rate * 100.0,
                    s.expected_return,
                    s.expected_profit
                );
            }
        }
        Command::Scan { date } => {
            let manager = build_manager(&cfg, cli.snapshot.as_ref(), false).await?;
            let run_date = date.unwrap_or_else(|| Utc::now().date_naive());
            let summary = manager.morning_scan(run_date, Utc::now()).await?;
            println!("{summary}");
        }
        Command::Monitor => {
            let manager = build_manager(&cfg, cli.snapshot.as_ref(), false).await?;
            let summary = manager.live_monitor(Utc::now()).await?;
            println!("{summary}");
        }
        Command::Execute { auto_place } => {
            let manager = build_manager(&cfg, cli.snapshot.as_ref(), auto_place).await?;
            let summary = manager.execute_ready(Utc::now()).await?;
            println!("{summary}");
            for failure in &summary.failures {
                println!("  failed {}: {}", failure.id, failure.message);
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

fn build_planner(cfg: &AppConfig) -> Planner {
    Planner::new(
        StakingOptimizer::new(cfg.optimizer_config()),
        cfg.presets(),
        cfg.engine.default_preset.clone(),
    )
}

fn build_source(
    cfg: &AppConfig,
    snapshot: Option<&PathBuf>,
    guard: ProviderGuard,
) -> Result<Arc<dyn RaceDataSource>> {
    let path = snapshot.context("--snapshot is required for this command")?;
    let snapshot = Arc::new(SnapshotSource::load(path)?);
    let guarded = Arc::new(GuardedRaceSource::new(
        "snapshot",
        snapshot,
        guard,
    ));
    Ok(Arc::new(CachedRaceSource::new(
        guarded,
        chrono::Duration::seconds(cfg.cache.ttl_secs as i64),
        cfg.cache.max_entries,
    )))
}

/// Tote client when a token and an endpoint for the configured mode exist,
/// paper wagering otherwise.
fn build_wagering(cfg: &AppConfig, guard: ProviderGuard) -> Result<Arc<dyn WageringProvider>> {
    let endpoint = match cfg.execution.mode {
        WagerMode::Audit => &cfg.wagering.audit_url,
        WagerMode::Live => &cfg.wagering.live_url,
    };
    match cfg.wagering_token() {
        Some(token) if !endpoint.is_empty() => {
            let client = ToteClient::new(
                cfg.wagering.audit_url.clone(),
                cfg.wagering.live_url.clone(),
                cfg.wagering.auth_scheme.clone(),
                token,
                std::time::Duration::from_secs(cfg.providers.request_timeout_secs),
            )
            .context("Failed to initialise tote client")?;
            info!(mode = %cfg.execution.mode, "Using tote wagering provider");
            Ok(Arc::new(GuardedWagering::new(
                "tote",
                Arc::new(client),
                guard,
            )))
        }
        _ => {
            warn!(
                token_env = %cfg.wagering.token_env,
                mode = %cfg.execution.mode,
                "No wagering credentials or endpoint configured, paper trading"
            );
            Ok(Arc::new(PaperWagering::new()))
        }
    }
}

async fn build_manager(
    cfg: &AppConfig,
    snapshot: Option<&PathBuf>,
    force_auto_place: bool,
) -> Result<LifecycleManager> {
    // One request budget for every provider this process talks to.
    let guard = ProviderGuard::from_config(&cfg.providers);
    let source = build_source(cfg, snapshot, guard.clone())?;
    let store: Arc<dyn RecommendationStore> = Arc::new(
        SqliteStore::connect(&cfg.storage.database_url)
            .await
            .with_context(|| format!("Failed to open store {}", cfg.storage.database_url))?,
    );
    let wagering = build_wagering(cfg, guard)?;

    let mut lifecycle = LifecycleConfig::from(cfg);
    lifecycle.auto_place |= force_auto_place;

    Ok(LifecycleManager::new(
        Arc::new(build_planner(cfg)),
        source,
        store,
        wagering,
        lifecycle,
    ))
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_viability(params: &PoolParams, n: usize, k: usize, stake_per_line: f64, steps: usize) {
    let total = total_lines(n, k);
    println!(
        "N={n} K={k} lines={total} O={:.2} t={:.3} R={:.2} m={:.2}",
        params.others_pool, params.takeout, params.rollover, params.multiplier
    );
    println!(
        "{:>7} {:>8} {:>10} {:>10} {:>8} {:>10} {:>10}",
        "lines", "cover", "stake", "net pool", "f-share", "ER", "EP"
    );
    for r in coverage_grid(params, n, k, stake_per_line, steps) {
        let e = r.economics;
        println!(
            "{:>7} {:>7.1}% {:>10.2} {:>10.2} {:>8.4} {:>10.2} {:>10.2}",
            r.lines_covered,
            r.coverage * 100.0,
            e.stake,
            e.net_pool,
            e.f_share,
            e.expected_return,
            e.expected_profit
        );
    }

    let full_stake = total as f64 * stake_per_line;
    let f = params.f_share_at(full_stake);
    match break_even_others_pool(params, full_stake, 1.0, f) {
        Ok(o_min) => println!("break-even others pool at full coverage: {o_min:.2}"),
        Err(e) => println!("break-even others pool: {e}"),
    }
    match alpha_min(params, total, stake_per_line, f) {
        Ok(alpha) => println!("minimum coverage for positive EV: {alpha:?}"),
        Err(e) => println!("minimum coverage: {e}"),
    }
}

/// Initialise structured logging via `tracing-subscriber`.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("superfecta=info"));

    let json_logging = std::env::var("SUPERFECTA_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
