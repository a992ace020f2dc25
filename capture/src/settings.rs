//! Persisted capture settings.
//!
//! The only persisted state is the `interceptEnabled` flag. It is read once
//! when a session starts and written on every toggle. Each write carries a
//! revision taken from the session, so a slow write can never overwrite a
//! newer one.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Settings document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Capture gate flag
    #[serde(default)]
    pub intercept_enabled: bool,
    /// Write counter; higher wins
    #[serde(default)]
    pub revision: u64,
}

/// Settings storage failures.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// Reading or writing the backing file failed
    #[error("settings I/O error at {path}: {source}")]
    Io {
        /// Backing file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The backing file does not hold a settings document
    #[error("malformed settings at {path}: {source}")]
    Malformed {
        /// Backing file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
}

/// Boxed future returned by [`SettingsStore`] methods.
pub type SettingsFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SettingsError>> + Send + 'a>>;

/// Storage for the settings document.
///
/// Explicit `Pin<Box<dyn Future>>` returns keep the trait usable as
/// `Arc<dyn SettingsStore>` inside effects.
pub trait SettingsStore: Send + Sync {
    /// Read the stored settings; a store that was never written yields the
    /// default (capture disabled).
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] when the backing storage is unreadable.
    fn load(&self) -> SettingsFuture<'_, Settings>;

    /// Store `settings` unless a higher revision was already stored.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] when the backing storage cannot be written.
    fn save(&self, settings: Settings) -> SettingsFuture<'_, ()>;
}

/// JSON file backed settings.
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    written: tokio::sync::Mutex<u64>,
}

impl FileSettings {
    /// Settings stored at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            written: tokio::sync::Mutex::new(0),
        }
    }

    /// Backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> SettingsError {
        SettingsError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl SettingsStore for FileSettings {
    fn load(&self) -> SettingsFuture<'_, Settings> {
        Box::pin(async move {
            let bytes = match tokio::fs::read(&self.path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(path = %self.path.display(), "No settings file, using defaults");
                    return Ok(Settings::default());
                },
                Err(e) => return Err(self.io_error(e)),
            };

            let settings: Settings =
                serde_json::from_slice(&bytes).map_err(|source| SettingsError::Malformed {
                    path: self.path.clone(),
                    source,
                })?;

            let mut written = self.written.lock().await;
            *written = (*written).max(settings.revision);
            Ok(settings)
        })
    }

    fn save(&self, settings: Settings) -> SettingsFuture<'_, ()> {
        Box::pin(async move {
            let mut written = self.written.lock().await;
            if settings.revision < *written {
                tracing::debug!(
                    revision = settings.revision,
                    stored = *written,
                    "Skipping stale settings write"
                );
                return Ok(());
            }

            let json = serde_json::to_vec_pretty(&settings).map_err(|source| {
                SettingsError::Malformed {
                    path: self.path.clone(),
                    source,
                }
            })?;

            let staging = self.path.with_extension("tmp");
            tokio::fs::write(&staging, json)
                .await
                .map_err(|e| self.io_error(e))?;
            tokio::fs::rename(&staging, &self.path)
                .await
                .map_err(|e| self.io_error(e))?;

            *written = settings.revision;
            Ok(())
        })
    }
}

/// In-memory settings, for tests and embedders without a filesystem.
#[derive(Debug, Clone, Default)]
pub struct MemorySettings {
    current: Arc<Mutex<Settings>>,
}

impl MemorySettings {
    /// Store pre-seeded with `settings`
    #[must_use]
    pub fn with(settings: Settings) -> Self {
        Self {
            current: Arc::new(Mutex::new(settings)),
        }
    }

    /// What is stored right now
    #[must_use]
    pub fn current(&self) -> Settings {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SettingsStore for MemorySettings {
    fn load(&self) -> SettingsFuture<'_, Settings> {
        let settings = self.current();
        Box::pin(async move { Ok(settings) })
    }

    fn save(&self, settings: Settings) -> SettingsFuture<'_, ()> {
        {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            if settings.revision >= current.revision {
                *current = settings;
            }
        }
        Box::pin(async { Ok(()) })
    }
}
