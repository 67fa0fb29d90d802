//! One configured package repository entry.
//!
//! A [`Source`] owns the download/cache lifecycle for its index files and
//! delegates parsing to the matching backend reader. The parsed graph is
//! published as an immutable [`SourceData`] snapshot behind an atomic swap;
//! a failed refresh leaves the previous snapshot in place, so concurrent
//! readers never observe a half-parsed graph.

use crate::error::{FleetError, Result};
use crate::fetch::Fetcher;
use crate::profile::ClientProfile;
use crate::readers::{Backend, GraphFragment};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Parsed repository graph, keyed by architecture. Immutable after
/// publication.
pub type SourceData = HashMap<String, GraphFragment>;

/// Normalized fields of one `<Source>` declaration.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    pub backend: Backend,
    pub url: Option<String>,
    pub rawurl: Option<String>,
    pub version: String,
    pub components: Vec<String>,
    pub arches: Vec<String>,
    pub priority: i32,
    pub essential: bool,
    pub recommended: bool,
    pub debsrc: bool,
    pub gpg_keys: Vec<String>,
    pub groups: BTreeSet<String>,
}

pub struct Source {
    opts: SourceOptions,
    /// Deterministic identity hash of the declaration; names the on-disk
    /// cache directory and feeds collection cache keys.
    identity: String,
    cache_dir: PathBuf,
    data: RwLock<Arc<SourceData>>,
}

impl Source {
    /// Build a source from its normalized declaration. Fails with
    /// [`SourceInit`](FleetError::SourceInit) when neither `url` nor `rawurl`
    /// is present; the caller skips the declaration and moves on.
    pub fn new(mut opts: SourceOptions, cache_root: &std::path::Path) -> Result<Self> {
        if opts.url.is_none() && opts.rawurl.is_none() {
            return Err(FleetError::SourceInit(
                "source declaration carries neither url nor rawurl".into(),
            ));
        }
        if opts.arches.is_empty() {
            return Err(FleetError::SourceInit(
                "source declaration lists no architectures".into(),
            ));
        }
        // Trailing slashes keep URL joins predictable.
        if let Some(url) = opts.url.take() {
            opts.url = Some(ensure_slash(url));
        }
        if let Some(raw) = opts.rawurl.take() {
            opts.rawurl = Some(ensure_slash(raw));
        }

        let identity = Self::hash_identity(&opts);
        let cache_dir = cache_root.join(format!("cache-{}", identity));
        Ok(Self {
            opts,
            identity,
            cache_dir,
            data: RwLock::new(Arc::new(SourceData::new())),
        })
    }

    fn hash_identity(opts: &SourceOptions) -> String {
        let mut hasher = Sha256::new();
        hasher.update(opts.backend.to_string());
        hasher.update(opts.url.as_deref().unwrap_or(""));
        hasher.update(opts.rawurl.as_deref().unwrap_or(""));
        hasher.update(&opts.version);
        hasher.update(opts.components.join(","));
        hasher.update(opts.arches.join(","));
        hasher.update(opts.priority.to_le_bytes());
        let digest = hasher.finalize();
        format!("{:x}", digest)[..16].to_string()
    }

    pub fn backend(&self) -> Backend {
        self.opts.backend
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn priority(&self) -> i32 {
        self.opts.priority
    }

    pub fn recommended(&self) -> bool {
        self.opts.recommended
    }

    pub fn gpg_keys(&self) -> &[String] {
        &self.opts.gpg_keys
    }

    pub fn cache_dir(&self) -> &std::path::Path {
        &self.cache_dir
    }

    /// The URL clients pin against: the base (or raw) repository URL.
    pub fn base_url(&self) -> &str {
        self.opts
            .url
            .as_deref()
            .or(self.opts.rawurl.as_deref())
            .unwrap_or("")
    }

    /// Whether this source applies to a client: every declared group must be
    /// in the client's group set, and the client architecture must be served.
    pub fn applies(&self, profile: &ClientProfile) -> bool {
        self.opts.groups.iter().all(|g| profile.groups.contains(g))
            && self.opts.arches.iter().any(|a| a == &profile.arch)
    }

    /// Index file locations to fetch for this source.
    pub fn urls(&self) -> Vec<String> {
        let o = &self.opts;
        if let Some(raw) = &o.rawurl {
            return match o.backend {
                Backend::Apt => vec![format!("{}Packages.gz", raw)],
                Backend::Yum => vec![format!("{}repodata/primary.xml", raw)],
                Backend::Pacman => o
                    .components
                    .iter()
                    .map(|c| format!("{}{}.db.tar.gz", raw, c))
                    .collect(),
                Backend::Pkgng => vec![format!("{}packagesite.tgz", raw)],
            };
        }
        let url = o.url.as_deref().unwrap_or("");
        let mut rv = Vec::new();
        match o.backend {
            Backend::Apt => {
                for comp in &o.components {
                    for arch in &o.arches {
                        rv.push(format!(
                            "{}dists/{}/{}/binary-{}/Packages.gz",
                            url, o.version, comp, arch
                        ));
                    }
                }
            }
            Backend::Yum => {
                for comp in &o.components {
                    for arch in &o.arches {
                        rv.push(format!(
                            "{}{}/{}/{}/repodata/primary.xml",
                            url, o.version, comp, arch
                        ));
                    }
                }
            }
            Backend::Pacman => {
                for comp in &o.components {
                    for arch in &o.arches {
                        rv.push(format!("{}{}/os/{}/{}.db.tar.gz", url, comp, arch, comp));
                    }
                }
            }
            Backend::Pkgng => {
                for comp in &o.components {
                    for arch in &o.arches {
                        rv.push(format!(
                            "{}freebsd:{}:{}/{}/packagesite.tgz",
                            url, o.version, arch, comp
                        ));
                    }
                }
            }
        }
        rv
    }

    /// Cached index files are named after their URL with path separators
    /// escaped, so the architecture can be recovered from the filename alone.
    pub fn escape_url(url: &str) -> String {
        url.replace('/', "@")
    }

    fn arch_from_filename(&self, fname: &str) -> String {
        let o = &self.opts;
        if o.rawurl.is_some() {
            // Raw mirrors are declared with exactly one architecture.
            return o.arches[0].clone();
        }
        let segments: Vec<&str> = fname.split('@').collect();
        let found = match o.backend {
            Backend::Apt => segments
                .iter()
                .find_map(|s| s.strip_prefix("binary-"))
                .map(str::to_string),
            Backend::Pkgng => segments
                .iter()
                .find(|s| s.starts_with("freebsd:"))
                .and_then(|abi| abi.split(':').nth(2))
                .map(str::to_string),
            Backend::Yum | Backend::Pacman => segments
                .iter()
                .find(|s| o.arches.iter().any(|a| a == *s))
                .map(|s| s.to_string()),
        };
        found.unwrap_or_else(|| o.arches[0].clone())
    }

    /// Ensure fresh on-disk copies of the index files exist (downloading any
    /// that are missing, or all of them when `force` is set), parse them, and
    /// atomically publish the new snapshot. On error the previous snapshot
    /// stays in place.
    pub async fn setup_data(&self, fetcher: &Fetcher, force: bool) -> Result<()> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        for url in self.urls() {
            let dest = self.cache_dir.join(Self::escape_url(&url));
            if force || !dest.exists() {
                debug!(url = %url, "downloading repository index");
                fetcher.fetch_to_file(&url, &dest).await?;
            }
        }
        self.read_files()
    }

    /// Parse every cached index file and publish the merged snapshot.
    pub fn read_files(&self) -> Result<()> {
        let mut new_data = SourceData::new();
        for url in self.urls() {
            let fname = Self::escape_url(&url);
            let path = self.cache_dir.join(&fname);
            let raw = std::fs::read(&path)?;
            let arch = self.arch_from_filename(&fname);
            let mut frag = self.opts.backend.parse(&raw, &arch)?;
            if !self.opts.essential {
                // Sources can opt out of contributing to the essential set.
                frag.essential.clear();
            }
            new_data.entry(arch).or_default().merge(frag);
        }
        *self.data.write().unwrap() = Arc::new(new_data);
        Ok(())
    }

    /// Current published snapshot. Callers hold the `Arc` for the duration
    /// of one operation so a concurrent reload cannot mix graphs under them.
    pub fn snapshot(&self) -> Arc<SourceData> {
        Arc::clone(&self.data.read().unwrap())
    }

    /// Backend-specific repository-definition snippet for generated client
    /// configuration files.
    pub fn build_repo_config(&self) -> String {
        let o = &self.opts;
        let name = format!("fleetpkg-{}", self.identity);
        match o.backend {
            Backend::Apt => {
                if let Some(raw) = &o.rawurl {
                    let trimmed = raw.trim_end_matches('/');
                    match trimmed.rfind('/') {
                        Some(idx) => {
                            format!("deb {} {}\n", &trimmed[..idx], &trimmed[idx + 1..])
                        }
                        None => format!("deb {}\n", trimmed),
                    }
                } else {
                    let url = o.url.as_deref().unwrap_or("");
                    let comps = o.components.join(" ");
                    let mut out = format!("deb {} {} {}\n", url, o.version, comps);
                    if o.debsrc {
                        out.push_str(&format!("deb-src {} {} {}\n", url, o.version, comps));
                    }
                    out
                }
            }
            Backend::Yum => {
                let mut out = format!("[{}]\nname={}\n", name, name);
                if let Some(raw) = &o.rawurl {
                    out.push_str(&format!("baseurl={}\n", raw));
                } else {
                    let url = o.url.as_deref().unwrap_or("");
                    for comp in &o.components {
                        out.push_str(&format!(
                            "baseurl={}{}/{}/$basearch/\n",
                            url, o.version, comp
                        ));
                    }
                }
                out.push_str("enabled=1\n");
                out.push_str(&format!(
                    "gpgcheck={}\n",
                    if o.gpg_keys.is_empty() { 0 } else { 1 }
                ));
                out
            }
            Backend::Pacman => {
                let mut out = String::new();
                for comp in &o.components {
                    out.push_str(&format!("[{}]\n", comp));
                    if let Some(raw) = &o.rawurl {
                        out.push_str(&format!("Server = {}\n", raw.trim_end_matches('/')));
                    } else {
                        let url = o.url.as_deref().unwrap_or("");
                        out.push_str(&format!("Server = {}{}/os/$arch\n", url, comp));
                    }
                }
                out
            }
            Backend::Pkgng => {
                let url = match (&o.rawurl, &o.url) {
                    (Some(raw), _) => raw.trim_end_matches('/').to_string(),
                    (None, Some(url)) => {
                        let comp = o.components.first().map(String::as_str).unwrap_or("latest");
                        format!("{}freebsd:{}:${{ABI}}/{}", url, o.version, comp)
                    }
                    (None, None) => String::new(),
                };
                format!("{}: {{\n  url: \"{}\",\n  enabled: yes\n}}\n", name, url)
            }
        }
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("backend", &self.opts.backend)
            .field("url", &self.base_url())
            .field("priority", &self.opts.priority)
            .field("identity", &self.identity)
            .finish()
    }
}

fn ensure_slash(mut url: String) -> String {
    if !url.ends_with('/') {
        url.push('/');
    }
    url
}
