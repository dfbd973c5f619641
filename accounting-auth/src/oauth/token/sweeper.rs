//! Background sweeper that refreshes tokens before they expire.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use super::{Coordinator, CredentialStore};
use crate::error::Error;

/// Outcome counts of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub refreshed: usize,
    pub failed: usize,
}

/// Periodically refreshes every enabled credential expiring within `lookahead`.
///
/// Refreshes go through the [`Coordinator`], so a sweep racing a caller-initiated
/// refresh for the same key joins that flight instead of starting a second one.
pub struct Sweeper<S: CredentialStore + 'static> {
    coordinator: Arc<Coordinator<S>>,
    lookahead: Duration,
}

impl<S: CredentialStore + 'static> Sweeper<S> {
    pub fn new(coordinator: Arc<Coordinator<S>>, lookahead: Duration) -> Self {
        Self {
            coordinator,
            lookahead,
        }
    }

    /// Run one pass. A failure for one credential never stops the others.
    pub async fn sweep(&self) -> Result<SweepReport, Error> {
        let expiring = self
            .coordinator
            .store()
            .list_expiring(Utc::now() + self.lookahead)
            .await?;

        if expiring.is_empty() {
            debug!("Sweep found no expiring credentials");
            return Ok(SweepReport::default());
        }

        info!("Sweep found {} expiring credentials", expiring.len());

        let mut tasks = JoinSet::new();
        for credential in expiring {
            let coordinator = self.coordinator.clone();
            let lookahead = self.lookahead;
            tasks.spawn(async move {
                let key = credential.key();
                let result = coordinator
                    .ensure_valid_token_within(&key.org_id, key.provider, lookahead)
                    .await;
                (key, result)
            });
        }

        let mut report = SweepReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(_))) => report.refreshed += 1,
                Ok((key, Err(err))) => {
                    warn!("Sweep could not refresh {}: {}", key, err.detail());
                    report.failed += 1;
                }
                Err(join_err) => {
                    error!("Sweep task panicked: {}", join_err);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Sweep complete: {} refreshed, {} failed",
            report.refreshed, report.failed
        );
        Ok(report)
    }

    /// Run sweeps every `interval` until `shutdown` flips to `true` or its sender is dropped.
    pub fn spawn(self, interval: StdDuration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Token sweeper started (interval: {}s, lookahead: {}s)",
                interval.as_secs(),
                self.lookahead.num_seconds()
            );
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.sweep().await {
                            error!("Sweep failed: {}", err);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Token sweeper stopped");
        })
    }
}
