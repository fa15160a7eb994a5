use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::histogram;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::{
    application::repos::SourceError,
    cache::{CacheKey, InvalidFilterError, StoreError},
};

const METRIC_WARM_MS: &str = "listing_cache_warm_ms";

#[derive(Debug, Error)]
pub enum WarmError {
    #[error("warm filters rejected: {0}")]
    Filter(#[from] InvalidFilterError),
    #[error("failed to compute listing: {0}")]
    Source(#[from] SourceError),
    #[error("failed to store warmed listing: {0}")]
    Store(#[from] StoreError),
}

/// The entry written by one successful warm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmedEntry {
    pub key: CacheKey,
    pub rows: usize,
}

/// A listing whose default view can be precomputed.
///
/// Implementations must write under the same key and tags their read path
/// uses.
#[async_trait]
pub trait WarmTarget: Send + Sync {
    fn resource(&self) -> &'static str;

    async fn warm(&self) -> Result<WarmedEntry, WarmError>;
}

#[derive(Debug, Default)]
pub struct WarmReport {
    pub succeeded: Vec<(&'static str, WarmedEntry)>,
    pub failed: Vec<(&'static str, WarmError)>,
}

impl WarmReport {
    /// True when there were targets and none of them warmed.
    pub fn all_failed(&self) -> bool {
        self.succeeded.is_empty() && !self.failed.is_empty()
    }

    pub fn failed_resources(&self) -> Vec<&'static str> {
        self.failed.iter().map(|(resource, _)| *resource).collect()
    }
}

pub struct CacheWarmer {
    targets: Vec<Arc<dyn WarmTarget>>,
}

impl CacheWarmer {
    pub fn new(targets: Vec<Arc<dyn WarmTarget>>) -> Self {
        Self { targets }
    }

    /// Warm every target once. A failing target never stops the others.
    pub async fn warm_all(&self) -> WarmReport {
        info!(
            target = "listing_cache::cache_warmer",
            targets = self.targets.len(),
            "warming listing cache"
        );

        let mut report = WarmReport::default();
        for target in &self.targets {
            let resource = target.resource();
            let started_at = Instant::now();
            let outcome = target.warm().await;
            let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
            histogram!(METRIC_WARM_MS, "resource" => resource).record(elapsed_ms);

            match outcome {
                Ok(entry) => {
                    info!(
                        target = "listing_cache::cache_warmer",
                        resource,
                        key = %entry.key,
                        rows = entry.rows,
                        elapsed_ms,
                        "warmed listing"
                    );
                    report.succeeded.push((resource, entry));
                }
                Err(err) => {
                    warn!(
                        target = "listing_cache::cache_warmer",
                        resource,
                        error = %err,
                        elapsed_ms,
                        "listing warm failed"
                    );
                    report.failed.push((resource, err));
                }
            }
        }

        report
    }

    /// Warm on a fixed interval until `shutdown` resolves.
    ///
    /// Passes run one after another; a pass that overruns the interval
    /// skips the ticks it missed.
    pub async fn run_every<S>(&self, interval: Duration, shutdown: S)
    where
        S: std::future::Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(target = "listing_cache::cache_warmer", "warm schedule stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let report = self.warm_all().await;
                    if report.all_failed() {
                        warn!(
                            target = "listing_cache::cache_warmer",
                            failed = ?report.failed_resources(),
                            "every warm target failed"
                        );
                    }
                }
            }
        }
    }
}
