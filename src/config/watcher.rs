//! Hot reload of the configuration file.
//!
//! Editors often emit several modify events per save; reloads whose file
//! content matches the last accepted content are dropped.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::{parse_config, ConfigError};
use crate::config::schema::GatewayConfig;

/// What a reload attempt did.
#[derive(Debug)]
pub enum ReloadOutcome {
    /// A new validated config was sent to the receiver.
    Applied,
    /// The file content matches the last accepted config.
    Unchanged,
    /// The file could not be read, parsed or validated; nothing was sent.
    Rejected(ConfigError),
}

/// Watches one configuration file and publishes validated updates.
#[derive(Clone)]
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<GatewayConfig>,
    last_content: Arc<Mutex<Option<String>>>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for validated configuration updates.
    ///
    /// The file's current content counts as already applied, so the first
    /// event only publishes if the file actually changed.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GatewayConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let current = fs::read_to_string(path).ok();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
                last_content: Arc::new(Mutex::new(current)),
            },
            update_rx,
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file and publish it if it changed and validates.
    pub fn reload(&self) -> ReloadOutcome {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => return ReloadOutcome::Rejected(ConfigError::Io(e)),
        };

        let mut last = self.last_content.lock().unwrap_or_else(PoisonError::into_inner);
        if last.as_deref() == Some(content.as_str()) {
            return ReloadOutcome::Unchanged;
        }

        match parse_config(&content) {
            Ok(config) => {
                *last = Some(content);
                let _ = self.update_tx.send(config);
                ReloadOutcome::Applied
            }
            Err(e) => ReloadOutcome::Rejected(e),
        }
    }

    fn handle_event(&self, event: Event) {
        if !(event.kind.is_modify() || event.kind.is_create()) {
            return;
        }
        if !event.paths.is_empty() && !event.paths.iter().any(|p| p.ends_with(self.file_name())) {
            return;
        }

        match self.reload() {
            ReloadOutcome::Applied => tracing::info!(path = ?self.path, "Configuration reloaded"),
            ReloadOutcome::Unchanged => tracing::debug!(path = ?self.path, "Configuration unchanged"),
            ReloadOutcome::Rejected(e) => {
                tracing::error!(error = %e, "Failed to reload config. Keeping current configuration.")
            }
        }
    }

    fn file_name(&self) -> &Path {
        self.path.file_name().map(Path::new).unwrap_or(self.path.as_path())
    }

    /// Start watching. Keep the returned watcher alive to keep watching.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.path.clone();
        let handler = self.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => handler.handle_event(event),
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}
