//! Basket engine operator CLI (acp-baskets)
//!
//! Maintenance entry points over the same engine the application embeds:
//! refreshing the cycle count cache, reconciling memberships and inspecting
//! which deliveries a cycle matches.

use std::path::PathBuf;
use std::sync::Arc;

use acp_baskets::db;
use acp_baskets::Engine;
use acp_common::config::{load_engine_config, resolve_database_path};
use acp_common::db::{init_database, load_tenant_settings};
use acp_common::events::AcpEvent;
use acp_common::time::{Clock, FixedClock, SystemClock};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for acp-baskets
#[derive(Parser, Debug)]
#[command(name = "acp-baskets")]
#[command(about = "Delivery cycle and membership basket maintenance")]
#[command(version)]
struct Args {
    /// SQLite database file
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Engine configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Treat this date as today (YYYY-MM-DD)
    #[arg(long, global = true)]
    today: Option<NaiveDate>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recompute the delivery counts of every cycle
    RefreshCounts,
    /// Reconcile the baskets of one membership
    Reconcile { membership_id: i64 },
    /// Reconcile the baskets of every membership
    ReconcileAll,
    /// List the deliveries a cycle matches in a fiscal year
    CycleDeliveries { cycle_id: i64, year: i32 },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "acp_baskets=info,acp_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = load_engine_config(args.config.as_deref()).context("Failed to load configuration")?;
    let db_path = resolve_database_path(args.database.as_deref());
    info!("Database: {}", db_path.display());

    let pool = init_database(&db_path)
        .await
        .context("Failed to open database")?;

    let clock: Arc<dyn Clock> = match args.today {
        Some(date) => Arc::new(FixedClock::new(date)),
        None => Arc::new(SystemClock),
    };
    let pricing = Arc::new(db::pricing::SqlitePricing::new(pool.clone()));
    let engine = Engine::new(pool, &config, clock, pricing);

    let result = run(&engine, args.command).await;
    engine.shutdown().await;
    result
}

async fn run(engine: &Engine, command: Command) -> Result<()> {
    match command {
        Command::RefreshCounts => {
            let refreshed = engine
                .count_cache
                .refresh_all()
                .await
                .context("Failed to refresh cycle counts")?;
            println!("Refreshed counts of {} cycles", refreshed);
        }

        Command::Reconcile { membership_id } => {
            let outcome = engine
                .memberships
                .reconcile_now(membership_id)
                .await
                .with_context(|| format!("Failed to reconcile membership {}", membership_id))?;
            println!(
                "Membership {}: {} added, {} removed, price {:.2}",
                membership_id,
                outcome.added.len(),
                outcome.removed.len(),
                outcome.price
            );
        }

        Command::ReconcileAll => {
            let mut events = engine.event_bus.subscribe();
            let ids = db::memberships::all_membership_ids(&engine.db).await?;
            for id in &ids {
                engine.dispatcher.schedule(*id);
            }
            engine.wait_idle().await;

            let mut failed = 0;
            loop {
                match events.try_recv() {
                    Ok(AcpEvent::ReconciliationFailed {
                        membership_id, error, ..
                    }) => {
                        eprintln!("Membership {} failed: {}", membership_id, error);
                        failed += 1;
                    }
                    Ok(_) => {}
                    Err(TryRecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event bus lagged, some failures were not listed");
                    }
                    Err(_) => break,
                }
            }
            println!("Reconciled {} memberships, {} failed", ids.len().saturating_sub(failed), failed);
            if failed > 0 {
                anyhow::bail!("{} memberships could not be reconciled", failed);
            }
        }

        Command::CycleDeliveries { cycle_id, year } => {
            let settings = load_tenant_settings(&engine.db).await?;
            let fiscal_year = settings.fiscal_year(year)?;
            let cycle = db::cycles::get_cycle(&engine.db, cycle_id).await?;
            let deliveries = engine.matcher.deliveries(&cycle, fiscal_year).await?;

            let language = settings.languages.first().map(String::as_str).unwrap_or("fr");
            println!(
                "{} ({}): {} deliveries",
                cycle.name(language, &settings.languages),
                fiscal_year,
                deliveries.len()
            );
            for delivery in deliveries {
                println!("  {}  #{}", delivery.date, delivery.id);
            }
        }
    }
    Ok(())
}
