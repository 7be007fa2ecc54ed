use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::{CatalogRepository, GridError, GridResult};

/// Garbage collector for uploads that never finalized.
///
/// An aborted or dropped upload leaves its pending entry and chunks behind.
/// Each cycle removes every pending upload idle for longer than the grace
/// period, chunks first. An upload still writing after being reaped fails
/// rather than finalizing. Nothing runs unless the host starts it.
pub struct OrphanReaper {
    catalog: Arc<dyn CatalogRepository>,
    grace: Duration,
    interval: Duration,
}

impl OrphanReaper {
    pub fn new(catalog: Arc<dyn CatalogRepository>, grace: Duration) -> Self {
        Self {
            catalog,
            grace,
            interval: Duration::from_secs(300),
        }
    }

    /// How often [`start`](Self::start) runs a cycle
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Run cycles forever; failed cycles are logged and retried next tick
    pub async fn start(self) -> GridResult<()> {
        let mut ticker = interval(self.interval);

        info!(
            "Starting orphan reaper with interval {:?} and grace {:?}",
            self.interval, self.grace
        );

        loop {
            ticker.tick().await;

            match self.reap_once().await {
                Ok(0) => debug!("No orphaned uploads found"),
                Ok(reaped) => info!("Reaped {} orphaned uploads", reaped),
                Err(e) => warn!("Error during orphan reaping: {}", e),
            }
        }
    }

    /// One cycle; returns how many idle uploads were removed
    pub async fn reap_once(&self) -> GridResult<usize> {
        let grace = chrono::Duration::from_std(self.grace)
            .map_err(|_| GridError::invalid(format!("Orphan grace {:?} is out of range", self.grace)))?;
        let cutoff = Utc::now() - grace;

        let orphans = self.catalog.find_orphans(cutoff).await?;
        for id in &orphans {
            debug!("Reaping orphaned upload {}", id);
            self.catalog.delete_chunks(id).await?;
            self.catalog.delete_file(id).await?;
        }

        Ok(orphans.len())
    }
}

impl std::fmt::Debug for OrphanReaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrphanReaper")
            .field("grace", &self.grace)
            .field("interval", &self.interval)
            .finish()
    }
}
