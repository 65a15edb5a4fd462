//! Periodic expiry sweeper.
//!
//! Times out activities whose deadline has passed so a job never waits
//! forever on a callback that will not come.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::engine::Engine;

/// Runs [`Engine::sweep_expired`] on a fixed interval.
pub struct ExpirySweeper {
    engine: Engine,
    interval: Duration,
    shutdown: watch::Sender<bool>,
}

impl ExpirySweeper {
    pub fn new(engine: Engine, interval: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            engine,
            interval,
            shutdown,
        }
    }

    /// Starts the sweep loop on the current runtime.
    pub fn start(&self) -> JoinHandle<()> {
        let engine = self.engine.clone();
        let interval = self.interval;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            interval_timer.tick().await; // skip immediate first tick

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {},
                    _ = shutdown_rx.changed() => break,
                }

                if *shutdown_rx.borrow() {
                    break;
                }

                match engine.sweep_expired(Utc::now()).await {
                    Ok(0) => {}
                    Ok(n) => log::info!("Expiry sweep timed out {} activit(ies)", n),
                    Err(e) => log::error!("Expiry sweep failed: {}", e),
                }
            }
            log::debug!("Expiry sweeper stopped");
        })
    }

    /// Signals the sweeper to stop.
    pub fn stop(&self) {
        // No receivers means the loop already ended.
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityGateway;
    use crate::broadcast::JobProgressBroadcaster;
    use crate::config::Config;
    use crate::db::Database;
    use crate::engine::EngineConfig;

    #[tokio::test]
    async fn test_sweeper_shutdown() {
        let config = Config {
            library_path: "/library".to_string(),
            preview_path: "/preview".to_string(),
            ..Config::default()
        };
        let engine = Engine::new(
            Database::open_in_memory().unwrap(),
            EngineConfig::from_config(&config),
            ActivityGateway::from_config(&config),
            JobProgressBroadcaster::default(),
        );

        let sweeper = ExpirySweeper::new(engine, Duration::from_millis(20));
        let handle = sweeper.start();

        tokio::time::sleep(Duration::from_millis(50)).await;
        sweeper.stop();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sweeper did not stop")
            .expect("sweeper task panicked");
    }
}
