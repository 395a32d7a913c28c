//! SAT certificate resolution.
//!
//! Certificates are looked up by their 20-digit number, in this order:
//! 1. Cache, keyed by the primary URL
//! 2. SAT repository (primary)
//! 3. Mirror (secondary)
//!
//! A successful download from either source is cached under the primary URL.
mod cache;
mod fetch;

pub use cache::{CertificateCache, MemoryCertificateCache};
pub use fetch::{CertificateFetcher, FetchError, HttpFetcher};

use crate::config::Config;
use std::{fmt, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid certificate number: {0:?}")]
    InvalidIdentifier(String),
    #[error("{primary}, {secondary}")]
    AggregateFetchFailure {
        primary: FetchError,
        secondary: FetchError,
    },
}

/// Validated 20-digit certificate number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CertificateId(String);

impl CertificateId {
    pub const LEN: usize = 20;

    /// # Errors
    /// Returns [`ResolveError::InvalidIdentifier`] unless `id` is exactly 20
    /// ASCII digits.
    pub fn parse(id: &str) -> Result<Self, ResolveError> {
        if id.len() == Self::LEN && id.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(id.to_string()))
        } else {
            Err(ResolveError::InvalidIdentifier(id.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CertificateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Download locations of one certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUrls {
    pub primary: String,
    pub secondary: String,
}

impl SourceUrls {
    /// The SAT repository nests certificates by slices of the number:
    /// `{base}/{0..6}/{6..12}/{12..14}/{14..16}/{16..18}/{id}.cer`.
    pub fn derive(id: &CertificateId, config: &Config) -> Self {
        let id = id.as_str();
        let primary = format!(
            "{}/{}/{}/{}/{}/{}/{}.cer",
            config.primary_base_url(),
            &id[0..6],
            &id[6..12],
            &id[12..14],
            &id[14..16],
            &id[16..18],
            id
        );
        let secondary = format!("{}/{}.cer", config.secondary_base_url(), id);
        Self { primary, secondary }
    }
}

/// Resolves SAT certificates through the cache and the two sources.
#[derive(Clone)]
pub struct CertificateResolver {
    config: Config,
    fetcher: Arc<dyn CertificateFetcher>,
    cache: Arc<dyn CertificateCache>,
}

impl fmt::Debug for CertificateResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateResolver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CertificateResolver {
    pub fn new(
        config: &Config,
        fetcher: Arc<dyn CertificateFetcher>,
        cache: Arc<dyn CertificateCache>,
    ) -> Self {
        Self {
            config: config.clone(),
            fetcher,
            cache,
        }
    }

    /// Resolver over HTTP with a fresh in-memory cache.
    ///
    /// # Errors
    /// Returns [`FetchError::Http`] if the HTTP client cannot be built.
    pub fn with_defaults(config: &Config) -> Result<Self, FetchError> {
        let fetcher = HttpFetcher::new(config.fetch_timeout())?;
        Ok(Self::new(
            config,
            Arc::new(fetcher),
            Arc::new(MemoryCertificateCache::new()),
        ))
    }

    /// DER bytes of the certificate numbered `id`.
    ///
    /// # Errors
    /// Returns [`ResolveError::InvalidIdentifier`] before any network call for
    /// malformed numbers, and [`ResolveError::AggregateFetchFailure`] when both
    /// sources fail.
    pub async fn resolve(&self, id: &str) -> Result<Vec<u8>, ResolveError> {
        let id = CertificateId::parse(id)?;
        let urls = SourceUrls::derive(&id, &self.config);

        if let Some(bytes) = self.cache.get(&urls.primary) {
            debug!(%id, key = %urls.primary, "certificate cache hit");
            return Ok(bytes);
        }

        let primary = match self.fetch(&urls.primary).await {
            Ok(bytes) => {
                self.store(&urls.primary, &bytes);
                return Ok(bytes);
            }
            Err(error) => error,
        };
        warn!(
            %id,
            url = %urls.primary,
            error = %primary,
            "primary certificate source failed, trying mirror"
        );

        match self.fetch(&urls.secondary).await {
            Ok(bytes) => {
                self.store(&urls.primary, &bytes);
                Ok(bytes)
            }
            Err(secondary) => {
                warn!(
                    %id,
                    url = %urls.secondary,
                    error = %secondary,
                    "mirror certificate source failed"
                );
                Err(ResolveError::AggregateFetchFailure { primary, secondary })
            }
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let limit = self.config.fetch_timeout();
        tokio::time::timeout(limit, self.fetcher.fetch(url))
            .await
            .unwrap_or(Err(FetchError::Timeout(limit)))
    }

    fn store(&self, key: &str, bytes: &[u8]) {
        self.cache.set(key, bytes.to_vec(), self.ttl());
        debug!(key, "certificate cached");
    }

    fn ttl(&self) -> Duration {
        self.config.cache_ttl()
    }
}
