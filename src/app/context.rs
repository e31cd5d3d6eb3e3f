use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::app::error::{Result, RssqError};
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::fetcher::{Fetcher, HttpFetcher};
use crate::registry::Registry;
use crate::scheduler::Scheduler;
use crate::state::StateStore;
use crate::store::{SqliteStore, Store};
use crate::timeline::Timeline;

/// A problem found while opening that did not stop startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupWarning {
    pub message: String,
    /// Where the unreadable database was moved to, if it was.
    pub quarantined: Option<PathBuf>,
}

impl fmt::Display for StartupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.quarantined {
            Some(path) => write!(f, "{} (moved to {})", self.message, path.display()),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Wires the engine together: state, registry, scheduler and timeline.
pub struct AppContext {
    pub config: SyncConfig,
    pub clock: Arc<dyn Clock>,
    pub state: Arc<StateStore>,
    pub registry: Registry,
    pub scheduler: Arc<Scheduler>,
    pub timeline: Timeline,
    pub warnings: Vec<StartupWarning>,
}

impl AppContext {
    /// Opens the database at `db_path` with the HTTP fetcher and system clock.
    ///
    /// An unreadable database is moved aside and replaced by an empty one;
    /// this is reported through [`AppContext::warnings`].
    pub fn open(db_path: &Path, config: SyncConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::with_timeout(config.fetch_timeout)?);

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let (state, warning) = Self::load_sqlite(db_path, clock.now())?;
        Self::assemble(state, fetcher, clock, config, warning.into_iter().collect())
    }

    /// Builds a context over any store; corrupt state degrades to empty.
    pub fn with_parts(
        store: Arc<dyn Store>,
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Result<Self> {
        let (state, corruption) = StateStore::load_or_empty(store)?;
        let warnings = corruption
            .map(|e| StartupWarning {
                message: e.to_string(),
                quarantined: None,
            })
            .into_iter()
            .collect();

        Self::assemble(Arc::new(state), fetcher, clock, config, warnings)
    }

    pub fn in_memory(
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Result<Self> {
        Self::with_parts(Arc::new(SqliteStore::in_memory()?), fetcher, clock, config)
    }

    fn assemble(
        state: Arc<StateStore>,
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
        warnings: Vec<StartupWarning>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Registry::new(Arc::clone(&state), Arc::clone(&clock), config.on_remove);
        registry.sync_configured(&config.feeds);

        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&state),
            fetcher,
            Arc::clone(&clock),
            config.clone(),
        ));
        let timeline = Timeline::new(Arc::clone(&state));

        for warning in &warnings {
            tracing::warn!("{}", warning);
        }

        Ok(Self {
            config,
            clock,
            state,
            registry,
            scheduler,
            timeline,
            warnings,
        })
    }

    fn load_sqlite(path: &Path, now: DateTime<Utc>) -> Result<(Arc<StateStore>, Option<StartupWarning>)> {
        match Self::try_load(path) {
            Ok(state) => Ok((state, None)),
            Err(RssqError::CorruptState(reason)) => {
                let quarantined = quarantine(path, now)?;
                tracing::warn!(
                    "Database {} is unreadable ({}), starting fresh",
                    path.display(),
                    reason
                );

                let state = Self::try_load(path)?;
                let warning = StartupWarning {
                    message: format!("Corrupt state: {}", reason),
                    quarantined: Some(quarantined),
                };
                Ok((state, Some(warning)))
            }
            Err(e) => Err(e),
        }
    }

    fn try_load(path: &Path) -> Result<Arc<StateStore>> {
        let store = Arc::new(SqliteStore::new(path)?);
        Ok(Arc::new(StateStore::load(store)?))
    }
}

/// Moves `path` to `<path>.corrupt-<timestamp>` and returns the new location.
fn quarantine(path: &Path, now: DateTime<Utc>) -> Result<PathBuf> {
    let mut target = path.as_os_str().to_owned();
    target.push(format!(".corrupt-{}", now.format("%Y%m%d%H%M%S")));
    let target = PathBuf::from(target);

    std::fs::rename(path, &target)?;

    // A stale rollback journal belongs to the moved file, not the new one.
    let mut journal = path.as_os_str().to_owned();
    journal.push("-journal");
    let journal = PathBuf::from(journal);
    if journal.exists() {
        let mut moved = target.as_os_str().to_owned();
        moved.push("-journal");
        std::fs::rename(&journal, PathBuf::from(moved))?;
    }

    Ok(target)
}
