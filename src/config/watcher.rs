//! Hot reload of the gateway config file.
//!
//! The parent directory is watched rather than the file itself: editors
//! that save by writing a temp file and renaming it over the original
//! would otherwise leave the watch attached to a deleted inode.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::GatewayConfig;

/// Pushes every successfully validated revision of one config file.
pub struct ConfigWatcher {
    path: PathBuf,
    updates: mpsc::UnboundedSender<GatewayConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiving end of its updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GatewayConfig>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            updates,
        };
        (watcher, rx)
    }

    /// Start watching. Watching stops when the returned handle is dropped.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let file = self.path.clone();
        let dir = match file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let updates = self.updates;
        let last_applied: Mutex<Option<GatewayConfig>> = Mutex::new(None);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::error!(error = %e, "Config watch error");
                        return;
                    }
                };
                if !(event.kind.is_modify() || event.kind.is_create()) || !touches(&event, &file) {
                    return;
                }

                match load_config(&file) {
                    Ok(config) => {
                        let mut last = last_applied.lock().unwrap_or_else(|p| p.into_inner());
                        // One save usually raises several events.
                        if last.as_ref() == Some(&config) {
                            return;
                        }
                        tracing::info!(path = ?file, routes = config.routes.len(), "Config file changed, reloading");
                        *last = Some(config.clone());
                        let _ = updates.send(config);
                    }
                    Err(e) => {
                        tracing::error!(path = ?file, error = %e, "Rejected config reload, keeping current routes");
                    }
                }
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

fn touches(event: &Event, file: &Path) -> bool {
    let name = file.file_name();
    event.paths.iter().any(|p| p.file_name() == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, EventKind};

    #[test]
    fn test_touches_matches_file_name_only() {
        let event = Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/etc/gw/gateway.toml"));
        assert!(touches(&event, Path::new("gateway.toml")));
        assert!(touches(&event, Path::new("/etc/gw/gateway.toml")));
        assert!(!touches(&event, Path::new("/etc/gw/other.toml")));
    }
}
