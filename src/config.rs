//! Service configuration.
//!
//! All knobs are carried on an explicit [`ServiceConfig`] struct passed into
//! [`PackageService`](crate::service::PackageService) at construction and
//! threaded through to sources and collections. Nothing reads ambient global
//! state.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default version policy applied to emitted package entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionPolicy {
    /// Pin entries to whatever version the client's package manager selects.
    #[default]
    Auto,
    /// Accept any installed version.
    Any,
}

impl VersionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionPolicy::Auto => "auto",
            VersionPolicy::Any => "any",
        }
    }
}

/// Configuration for the package resolution service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Path to the sources declaration document (`sources.xml`).
    pub sources_path: PathBuf,
    /// Root directory for on-disk caches of downloaded repository indices.
    pub cache_dir: PathBuf,
    /// Whether the dependency resolver runs at all. When false, resolution
    /// degrades to pass-through annotation of group requests.
    pub resolver: bool,
    /// Whether repository metadata is downloaded and parsed. Disabling this
    /// implies disabling the resolver.
    pub metadata: bool,
    /// Version attribute stamped onto emitted package entries.
    pub version_policy: VersionPolicy,
    /// Per-request timeout for index and GPG key downloads.
    pub request_timeout: Duration,
}

impl ServiceConfig {
    pub fn new(sources_path: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            sources_path: sources_path.into(),
            cache_dir: cache_dir.into(),
            resolver: true,
            metadata: true,
            version_policy: VersionPolicy::default(),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Directory where downloaded GPG key files are managed.
    pub fn key_dir(&self) -> PathBuf {
        self.cache_dir.join("keys")
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Resolution is active only when both metadata processing and the
    /// resolver are enabled.
    pub fn resolver_enabled(&self) -> bool {
        self.metadata && self.resolver
    }
}
