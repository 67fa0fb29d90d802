//! Top-level coordination: the package resolution service.
//!
//! [`PackageService`] owns the source registry, the on-disk cache root and
//! GPG key directory, and two in-memory caches: `collections` (cachekey to
//! [`Collection`], long-lived, cleared wholesale on reload) and `clients`
//! (hostname to cachekey, purged at the end of every client run — hosts can
//! change groups between runs, which changes their applicable sources).

use crate::collection::Collection;
use crate::config::ServiceConfig;
use crate::error::Result;
use crate::fetch::Fetcher;
use crate::profile::{ClientProfile, PackageRequest, Resolution, Structure};
use crate::readers::Backend;
use crate::registry::SourceRegistry;
use crate::source::Source;
use anyhow::anyhow;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

pub struct PackageService {
    config: ServiceConfig,
    fetcher: Fetcher,
    registry: RwLock<SourceRegistry>,
    collections: moka::sync::Cache<String, Arc<Collection>>,
    clients: moka::sync::Cache<String, String>,
}

impl PackageService {
    /// Construct the service: parse the sources document and prepare cache
    /// directories. Repository data is not downloaded here; call
    /// [`reload`](Self::reload) or [`refresh`](Self::refresh) to populate it.
    ///
    /// Only a fully-unparseable root sources document is fatal.
    pub fn new(config: ServiceConfig) -> Result<Self> {
        std::fs::create_dir_all(config.cache_dir())?;
        std::fs::create_dir_all(config.key_dir())?;

        let registry = SourceRegistry::load(&config.sources_path, &config.cache_dir)?;
        let fetcher = Fetcher::new(config.request_timeout)?;
        Ok(Self {
            config,
            fetcher,
            registry: RwLock::new(registry),
            collections: moka::sync::Cache::new(1024),
            clients: moka::sync::Cache::new(8192),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Number of usable sources currently registered.
    pub fn source_count(&self) -> usize {
        self.registry.read().unwrap().len()
    }

    /// Get (or build) the collection of sources applicable to a client.
    ///
    /// Falls back to a transient empty collection while the registry is
    /// still loading, when no source applies, or when the applicable sources
    /// span more than one backend type.
    pub fn get_collection(&self, profile: &ClientProfile) -> Arc<Collection> {
        let registry = self.registry.read().unwrap();
        if !registry.is_fully_loaded() {
            return Arc::new(Collection::empty(&profile.arch, self.config.version_policy));
        }

        if let Some(cachekey) = self.clients.get(&profile.hostname) {
            if let Some(collection) = self.collections.get(&cachekey) {
                return collection;
            }
        }

        let relevant: Vec<Arc<Source>> = registry
            .sources()
            .iter()
            .filter(|s| s.applies(profile))
            .cloned()
            .collect();
        drop(registry);

        let backends: BTreeSet<Backend> = relevant.iter().map(|s| s.backend()).collect();
        if relevant.is_empty() {
            error!("No sources found for {}", profile.hostname);
            return Arc::new(Collection::empty(&profile.arch, self.config.version_policy));
        }
        if backends.len() > 1 {
            warn!(
                "Multiple source types found for {}: {}",
                profile.hostname,
                backends
                    .iter()
                    .map(Backend::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            );
            return Arc::new(Collection::empty(&profile.arch, self.config.version_policy));
        }

        let collection = Arc::new(Collection::new(
            relevant,
            &profile.arch,
            self.config.version_policy,
        ));
        let cachekey = collection.cachekey().to_string();
        let collection = match self.collections.get(&cachekey) {
            Some(existing) => existing,
            None => {
                self.collections.insert(cachekey.clone(), Arc::clone(&collection));
                collection
            }
        };
        self.clients.insert(profile.hostname.clone(), cachekey);
        collection
    }

    /// Resolve a client's declared structures into the implied package list.
    ///
    /// Group requests are removed from the structures and expanded; explicit
    /// requests plus group members plus the essential set seed the closure.
    /// With the resolver (or metadata processing) disabled, no closure runs
    /// and group requests merely get their `choose` hint annotated.
    pub fn resolve_client(
        &self,
        profile: &ClientProfile,
        structures: &mut [Structure],
    ) -> Result<Resolution> {
        if !self.config.resolver_enabled() {
            for structure in structures.iter_mut() {
                for request in &mut structure.requests {
                    // A declared member-type hint always wins over any prior
                    // choose annotation.
                    if let PackageRequest::Group { kind, choose, .. } = request {
                        if kind.is_some() {
                            *choose = kind.clone();
                        }
                    }
                }
            }
            return Ok(Resolution::default());
        }

        let collection = self.get_collection(profile);

        let mut initial: BTreeSet<String> = BTreeSet::new();
        let mut groups: Vec<(String, Option<String>)> = Vec::new();
        let mut recommended: BTreeMap<String, bool> = BTreeMap::new();

        for structure in structures.iter_mut() {
            for request in &structure.requests {
                match request {
                    PackageRequest::Package { name, recommended: rec } => {
                        initial.extend(collection.packages_from_entry(name));
                        if let Some(flag) = rec {
                            recommended.insert(name.clone(), *flag);
                        }
                    }
                    PackageRequest::Group { name, kind, .. } => {
                        groups.push((name.clone(), kind.clone()));
                    }
                }
            }
            // Group requests are consumed here; their expansion comes back
            // through the resolved delta.
            structure
                .requests
                .retain(|r| matches!(r, PackageRequest::Package { .. }));
        }

        if collection.is_noop() {
            // Explicit packages pass through untouched; nothing to resolve.
            return Ok(Resolution::default());
        }

        let mut base = initial.clone();
        for members in collection.resolve_groups(&groups).values() {
            base.extend(members.iter().cloned());
        }
        base.extend(collection.essential_packages());

        let closure = collection.complete(&base, &recommended, &profile.pins);
        if !closure.unknown.is_empty() {
            info!("Got {} unknown entries", closure.unknown.len());
            info!("Unknown: {:?}", closure.unknown);
        }
        let new_packages = collection.get_new_packages(&initial, &closure.resolved);
        debug!(
            "{} base, {} complete, {} new",
            base.len(),
            closure.resolved.len(),
            new_packages.len()
        );

        Ok(Resolution {
            entries: collection.packages_to_entry(&new_packages),
            unknown: closure.unknown.iter().cloned().collect(),
        })
    }

    /// Generated repository-definition file content for a client.
    pub fn get_config(&self, profile: &ClientProfile) -> String {
        self.get_collection(profile).build_config()
    }

    /// Force re-download of all source data, then re-parse.
    pub async fn refresh(&self) -> Result<()> {
        self.load_data(true).await
    }

    /// Re-parse all source data from the on-disk cache, downloading only
    /// what is missing.
    pub async fn reload(&self) -> Result<()> {
        self.load_data(false).await
    }

    /// Change-notification callback for the sources document: re-parse it
    /// and, once the whole document set has been ingested, reload data.
    /// Returns whether a reload ran.
    pub async fn notify_sources_changed(&self) -> Result<bool> {
        let fully_loaded = {
            let mut registry = self.registry.write().unwrap();
            registry.reload()?;
            registry.is_fully_loaded()
        };
        if fully_loaded {
            info!("Sources fully ingested, reloading package data");
            self.reload().await?;
        }
        Ok(fully_loaded)
    }

    async fn load_data(&self, force: bool) -> Result<()> {
        let sources: Vec<Arc<Source>> = self.registry.read().unwrap().sources().to_vec();

        let mut failures = 0usize;
        if self.config.metadata {
            let results = futures::future::join_all(
                sources.iter().map(|s| s.setup_data(&self.fetcher, force)),
            )
            .await;
            for (source, result) in sources.iter().zip(results) {
                if let Err(e) = result {
                    // A single bad source keeps its previous snapshot and
                    // must not abort the whole reload.
                    error!("Failed to set up source {}: {}", source.base_url(), e);
                    failures += 1;
                }
            }
        }

        // Wholesale cache invalidation, strictly after the new snapshots are
        // published: a resolution racing the downloads above may still have
        // memoized results against pre-reload data, and those entries must
        // not outlive the reload. Collections drop their group and closure
        // caches, client mappings are discarded.
        for (_key, collection) in self.collections.iter() {
            collection.invalidate_caches();
        }
        self.collections.invalidate_all();
        self.clients.invalidate_all();

        let live_dirs: HashSet<PathBuf> =
            sources.iter().map(|s| s.cache_dir().to_path_buf()).collect();
        self.gc_cache_files(&live_dirs);
        self.load_gpg_keys(force).await;

        if !sources.is_empty() && failures == sources.len() {
            return Err(anyhow!("every configured source failed to load").into());
        }
        Ok(())
    }

    /// Remove cache directories with no corresponding live source.
    fn gc_cache_files(&self, live: &HashSet<PathBuf>) {
        let entries = match std::fs::read_dir(self.config.cache_dir()) {
            Ok(entries) => entries,
            Err(e) => {
                error!("Could not scan cache directory: {}", e);
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with("cache-") || live.contains(&path) {
                continue;
            }
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            if let Err(e) = result {
                error!("Could not remove cache file {}: {}", path.display(), e);
            }
        }
    }

    /// Download GPG keys declared by current sources and delete key files
    /// no source references anymore.
    async fn load_gpg_keys(&self, force: bool) {
        let sources: Vec<Arc<Source>> = self.registry.read().unwrap().sources().to_vec();
        let key_dir = self.config.key_dir();
        let mut keyfiles: HashSet<PathBuf> = HashSet::new();

        for source in &sources {
            for key_url in source.gpg_keys() {
                let basename = key_url
                    .trim_end_matches('/')
                    .rsplit('/')
                    .next()
                    .unwrap_or(key_url)
                    .to_string();
                let local = key_dir.join(basename);
                let fresh = keyfiles.insert(local.clone());
                if (force && fresh) || !local.exists() {
                    info!("Downloading GPG key {}", key_url);
                    if let Err(e) = self.fetcher.fetch_to_file(key_url, &local).await {
                        error!("Error downloading {}: {}", key_url, e);
                    }
                }
            }
        }

        if let Ok(entries) = std::fs::read_dir(&key_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if !keyfiles.contains(&path) {
                    if let Err(e) = std::fs::remove_file(&path) {
                        error!("Could not remove stale key file {}: {}", path.display(), e);
                    }
                }
            }
        }
    }

    /// End-of-run hook: drop the hostname's collection mapping. The
    /// collection itself stays cached for other clients sharing it.
    pub fn end_client_run(&self, hostname: &str) {
        self.clients.invalidate(hostname);
    }

    /// Statistics-processing hook; behaves exactly like
    /// [`end_client_run`](Self::end_client_run) so a stray mapping never
    /// outlives a run.
    pub fn end_statistics(&self, hostname: &str) {
        self.end_client_run(hostname);
    }
}
