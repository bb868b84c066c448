use std::sync::Arc;

use anyhow::Context;
use campus_core::{CampusConfig, Clock, SystemClock};
use campus_scheduler::{
    reconcile::select_survivors, ChannelDispatcher, FiredNotification, NotificationLifecycle,
    ScheduleStore, SchedulerEngine, SqliteScheduleStore, TokioTimer,
};
use chrono_tz::Tz;
use clap::Parser;
use tracing::info;

mod delivery;

#[derive(Debug, Parser)]
#[command(name = "campus-gateway", about = "Notification scheduling engine")]
struct Cli {
    /// Config file (default: $CAMPUS_CONFIG, then ~/.campus/campus.toml).
    #[arg(long, env = "CAMPUS_CONFIG")]
    config: Option<String>,

    /// Print which stored schedules would be armed, then exit.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campus_gateway=info,campus_scheduler=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > CAMPUS_CONFIG env > ~/.campus/campus.toml
    let config = CampusConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        CampusConfig::default()
    });
    let tz = config.scheduler.tz()?;

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let db = rusqlite::Connection::open(db_path)
        .with_context(|| format!("opening schedule database at {db_path}"))?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    let store = Arc::new(SqliteScheduleStore::new(db)?);

    let clock = Arc::new(SystemClock);

    if cli.dry_run {
        println!("{}", dry_run(store.as_ref(), clock.as_ref(), tz)?);
        return Ok(());
    }

    // Fired-notification channel: SchedulerEngine → delivery loop
    let (fired_tx, fired_rx) =
        tokio::sync::mpsc::channel::<FiredNotification>(config.delivery.channel_capacity.max(1));
    let delivery_task = tokio::spawn(delivery::run(fired_rx));

    let timer = Arc::new(TokioTimer::new(tz, config.scheduler.tick(), clock.clone()));
    let dispatcher = Arc::new(ChannelDispatcher::new(fired_tx, clock.clone()));
    let engine = SchedulerEngine::new(tz, timer, dispatcher, clock);
    let lifecycle = NotificationLifecycle::new(engine.clone(), store, config.reconcile.clone());

    let report = lifecycle
        .on_process_start()
        .await
        .context("startup reconciliation failed")?;
    info!(
        tz = %tz,
        tick_secs = config.scheduler.tick().as_secs(),
        jobs = report.jobs_armed,
        "campus-gateway running"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    engine.shutdown();

    // The engine owns the last sender; dropping it lets the delivery loop finish.
    drop(lifecycle);
    drop(engine);
    let _ = delivery_task.await;
    Ok(())
}

/// Which stored schedules would be armed right now, without arming them.
fn dry_run(
    store: &dyn ScheduleStore,
    clock: &dyn Clock,
    tz: Tz,
) -> anyhow::Result<serde_json::Value> {
    let definitions = store.find_active_schedules_with_definition()?;
    let survivors = select_survivors(&definitions, clock.now(), tz);
    for def in &survivors {
        info!(schedule_id = %def.id, kind = %def.notification_kind, "would arm");
    }
    Ok(serde_json::json!({
        "timezone": tz.name(),
        "loaded": definitions.len(),
        "survivors": survivors.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
    }))
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_core::FakeClock;
    use campus_scheduler::ScheduleDefinition;
    use chrono::{TimeZone, Utc};

    fn reminder(id: &str, date: &str) -> ScheduleDefinition {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "active": true,
            "notification_kind": "reminder",
            "schedule": { "type": "one_time", "dates": [date], "time": "10:00" },
        }))
        .unwrap()
    }

    #[test]
    fn dry_run_evaluates_at_the_clock_instant() {
        let store =
            SqliteScheduleStore::new(rusqlite::Connection::open_in_memory().unwrap()).unwrap();
        store.save(&reminder("early", "2026-03-02")).unwrap();
        store.save(&reminder("late", "2026-03-20")).unwrap();
        let clock = FakeClock::new(Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap());

        let report = dry_run(&store, &clock, Tz::UTC).unwrap();
        assert_eq!(report["loaded"], 2);
        assert_eq!(report["survivors"], serde_json::json!(["late"]));
        assert_eq!(report["timezone"], "UTC");
    }
}
