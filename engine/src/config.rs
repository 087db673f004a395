//! Engine settings.

use std::env;

/// Default number of rows requested per pull page.
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Largest page a pull will ever request.
pub const MAX_PAGE_SIZE: i64 = 1000;

/// Default number of times a conflicting operation is re-sent with the
/// local version before it is reported unresolved.
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 5;

/// Tunables for a sync context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Rows per pull page when the query sets no usable `top`
    pub page_size: i64,
    /// Conflict re-sends per operation per push cycle
    pub max_conflict_retries: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }
}

impl SyncSettings {
    /// Load settings from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let page_size = match env::var("TABLESYNC_PAGE_SIZE") {
            Ok(value) => value
                .parse::<i64>()
                .ok()
                .filter(|size| (1..=MAX_PAGE_SIZE).contains(size))
                .ok_or(ConfigError::InvalidPageSize(value))?,
            Err(_) => DEFAULT_PAGE_SIZE,
        };

        let max_conflict_retries = match env::var("TABLESYNC_MAX_CONFLICT_RETRIES") {
            Ok(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidConflictRetries(value))?,
            Err(_) => DEFAULT_MAX_CONFLICT_RETRIES,
        };

        Ok(Self {
            page_size,
            max_conflict_retries,
        })
    }

    /// Builder-style method to set the page size.
    pub fn with_page_size(mut self, page_size: i64) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Builder-style method to set the conflict retry cap.
    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid TABLESYNC_PAGE_SIZE value '{0}' (expected 1..=1000)")]
    InvalidPageSize(String),

    #[error("invalid TABLESYNC_MAX_CONFLICT_RETRIES value '{0}'")]
    InvalidConflictRetries(String),
}
