// Cleanup module
// Periodic and on-demand wipe of the tenant storage root


use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::config::Config;
use crate::database::TenantIndexes;

pub const DEFAULT_MARKER_FILE: &str = "README.md";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupOutcome {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub status: CleanupOutcome,
    pub message: String,
    pub items_removed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupStatus {
    pub cleanup_interval_seconds: u64,
    pub cleanup_interval_hours: f64,
    pub vector_db_path: String,
    pub vector_db_exists: bool,
    pub items_in_vector_db: usize,
}

/// Removes every entry under the storage root except the marker file
#[derive(Clone)]
pub struct CleanupScheduler {
    root: PathBuf,
    interval: Duration,
    marker_file: String,
    tenants: Option<Arc<dyn TenantIndexes>>,
}

impl std::fmt::Debug for CleanupScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupScheduler")
            .field("root", &self.root)
            .field("interval", &self.interval)
            .field("marker_file", &self.marker_file)
            .finish_non_exhaustive()
    }
}

impl CleanupScheduler {
    #[inline]
    pub fn new(root: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            root: root.into(),
            interval,
            marker_file: DEFAULT_MARKER_FILE.to_string(),
            tenants: None,
        }
    }

    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.vector_db_root(),
            Duration::from_secs(config.cleanup.interval_seconds),
        )
        .with_marker_file(config.cleanup.marker_file.clone())
    }

    #[inline]
    pub fn with_marker_file(mut self, marker_file: impl Into<String>) -> Self {
        self.marker_file = marker_file.into();
        self
    }

    /// Evict `tenants`' open stores after every wipe
    #[inline]
    pub fn with_tenants(mut self, tenants: Arc<dyn TenantIndexes>) -> Self {
        self.tenants = Some(tenants);
        self
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn is_marker(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.eq_ignore_ascii_case(&self.marker_file))
    }

    /// Wipe the storage root now
    #[inline]
    pub async fn run_once(&self) -> CleanupReport {
        info!("Starting vector DB cleanup of {}", self.root.display());
        let cleared = self.clear_root().await;
        // open handles may point at removed tables even after a partial wipe
        if let Some(tenants) = &self.tenants {
            tenants.evict_all();
        }

        match cleared {
            Ok(items_removed) => {
                if items_removed > 0 {
                    info!("Vector DB cleanup completed. Removed {} items.", items_removed);
                } else {
                    info!("Vector DB cleanup completed. No items to remove.");
                }
                CleanupReport {
                    status: CleanupOutcome::Success,
                    message: "Vector DB cleanup completed successfully".to_string(),
                    items_removed,
                }
            }
            Err(e) => {
                error!("Vector DB cleanup failed: {}", e);
                CleanupReport {
                    status: CleanupOutcome::Error,
                    message: format!("Vector DB cleanup failed: {}", e),
                    items_removed: 0,
                }
            }
        }
    }

    async fn clear_root(&self) -> Result<usize> {
        if !tokio::fs::try_exists(&self.root).await? {
            warn!("Vector DB path does not exist: {}", self.root.display());
            return Ok(0);
        }

        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if self.is_marker(&path) {
                continue;
            }

            let outcome = if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };

            match outcome {
                Ok(()) => {
                    debug!("Removed {}", path.display());
                    removed += 1;
                }
                Err(e) => error!("Failed to remove {}: {}", path.display(), e),
            }
        }
        Ok(removed)
    }

    /// Interval and current contents of the storage root
    #[inline]
    pub async fn status(&self) -> CleanupStatus {
        let exists = tokio::fs::try_exists(&self.root).await.unwrap_or(false);
        let items = if exists {
            self.count_items().await.unwrap_or_else(|e| {
                warn!("Failed to list {}: {}", self.root.display(), e);
                0
            })
        } else {
            0
        };

        CleanupStatus {
            cleanup_interval_seconds: self.interval.as_secs(),
            cleanup_interval_hours: self.interval.as_secs_f64() / 3600.0,
            vector_db_path: self.root.display().to_string(),
            vector_db_exists: exists,
            items_in_vector_db: items,
        }
    }

    async fn count_items(&self) -> Result<usize> {
        let mut count = 0;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !self.is_marker(&entry.path()) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Run the cleanup every interval until `shutdown` flips to `true`
    ///
    /// The first run happens one full interval after spawning.
    #[inline]
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Vector DB cleanup scheduled every {} seconds",
            self.interval.as_secs()
        );
        // tokio intervals reject a zero period
        let period = self.interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Cleanup scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }
}
