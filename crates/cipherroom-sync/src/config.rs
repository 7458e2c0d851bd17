use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Tunables for one room's synchronization engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Messages requested per history page.
    pub page_size: u32,
    /// Upper bound the history API accepts for a page.
    pub max_page_size: u32,
    /// Timeout applied to each history request by the HTTP transport.
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            max_page_size: 200,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl SyncConfig {
    /// Read overrides from `CIPHERROOM_PAGE_SIZE`, `CIPHERROOM_MAX_PAGE_SIZE`
    /// and `CIPHERROOM_REQUEST_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            page_size: env_or("CIPHERROOM_PAGE_SIZE", defaults.page_size)?,
            max_page_size: env_or("CIPHERROOM_MAX_PAGE_SIZE", defaults.max_page_size)?,
            request_timeout: Duration::from_secs(env_or(
                "CIPHERROOM_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
        })
    }

    /// Clamp a requested page size into `1..=max_page_size`.
    pub fn bounded_page_size(&self, requested: u32) -> u32 {
        requested.max(1).min(self.max_page_size.max(1))
    }
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}
