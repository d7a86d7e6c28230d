use anyhow::{Context, Result};
use chrono::Local;
use cron::Schedule;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info, warn};

/// Parses a cron expression. Standard 5-field expressions get a `0` seconds
/// field prepended; 6/7-field expressions are taken as-is.
pub fn parse_schedule(expr: &str) -> Result<Schedule> {
    let trimmed = expr.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    };
    Schedule::from_str(&normalized).with_context(|| format!("Invalid cron schedule '{}'", expr))
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Runs `job` at every upcoming time of `schedule` until `shutdown` resolves.
///
/// Each run is awaited before the next tick is computed, so runs never overlap
/// and ticks that pass during a long run are skipped. A failed run is logged
/// and the loop waits for the next tick.
pub async fn run_scheduled<F, Fut, S>(schedule: &Schedule, shutdown: S, mut job: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        let Some(next) = schedule.upcoming(Local).next() else {
            warn!("Schedule has no upcoming runs, stopping");
            return Ok(());
        };
        let wait = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);
        info!("Next backup scheduled at {}", next.format("%Y-%m-%d %H:%M:%S"));

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping scheduler");
                return Ok(());
            }
        }

        info!("Running scheduled backup");
        tokio::select! {
            result = job() => {
                if let Err(e) = result {
                    error!("Scheduled backup failed: {:#}", e);
                }
            }
            _ = &mut shutdown => {
                warn!("Shutdown signal received during a backup run, abandoning it");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Notify;

    #[test]
    fn test_five_field_expression_gets_seconds() -> Result<()> {
        let schedule = parse_schedule("0 2 * * *")?;
        let next = schedule.upcoming(Local).next().unwrap();
        assert_eq!(next.format("%H:%M:%S").to_string(), "02:00:00");
        Ok(())
    }

    #[test]
    fn test_six_field_expression_is_kept() -> Result<()> {
        let schedule = parse_schedule("30 */5 * * * *")?;
        let next = schedule.upcoming(Local).next().unwrap();
        assert_eq!(next.format("%S").to_string(), "30");
        Ok(())
    }

    #[test]
    fn test_invalid_expression_is_rejected() {
        let err = parse_schedule("every night at two").unwrap_err();
        assert!(err.to_string().contains("every night at two"));
        assert!(parse_schedule("").is_err());
    }

    #[tokio::test]
    async fn test_failed_runs_do_not_stop_the_loop() -> Result<()> {
        let schedule = parse_schedule("* * * * * *")?;
        let runs = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(Notify::new());

        let job = {
            let runs = runs.clone();
            let done = done.clone();
            move || {
                let runs = runs.clone();
                let done = done.clone();
                async move {
                    if runs.fetch_add(1, Ordering::SeqCst) + 1 >= 2 {
                        done.notify_one();
                    }
                    Err::<(), _>(anyhow::anyhow!("database unreachable"))
                }
            }
        };

        let shutdown = {
            let done = done.clone();
            async move { done.notified().await }
        };
        tokio::time::timeout(Duration::from_secs(10), run_scheduled(&schedule, shutdown, job))
            .await
            .context("scheduler did not stop")??;

        assert!(runs.load(Ordering::SeqCst) >= 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_before_first_tick() -> Result<()> {
        let schedule = parse_schedule("0 0 1 1 *")?;
        let runs = AtomicUsize::new(0);

        run_scheduled(&schedule, async {}, || {
            runs.fetch_add(1, Ordering::SeqCst);
            async { Ok::<(), anyhow::Error>(()) }
        })
        .await?;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        Ok(())
    }
}
