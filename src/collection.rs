//! Collections: the per-client view over applicable sources, and home of
//! the dependency-closure algorithm.
//!
//! A collection is shared by every client whose applicable source set and
//! architecture are identical, keyed by a deterministic [`cachekey`]. Its
//! group-expansion and closure caches are append-only between wholesale
//! invalidations, so two clients sharing a cachekey get bit-identical
//! resolution results for equal inputs without recomputation.
//!
//! [`cachekey`]: Collection::cachekey

use crate::config::VersionPolicy;
use crate::profile::PackageEntry;
use crate::readers::{Backend, GraphFragment};
use crate::source::{Source, SourceData};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use tracing::warn;

/// The `(resolved, unknown)` pair produced by [`Collection::complete`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosureResult {
    pub resolved: BTreeSet<String>,
    pub unknown: BTreeSet<String>,
}

/// A member source together with the snapshot captured when an operation
/// started. Holding the `Arc` pins one consistent graph per source for the
/// whole operation, reload or not.
struct SourceView {
    source: Arc<Source>,
    data: Arc<SourceData>,
}

impl SourceView {
    fn graph(&self, arch: &str) -> Option<&GraphFragment> {
        self.data.get(arch)
    }
}

pub struct Collection {
    cachekey: String,
    arch: String,
    backend: Option<Backend>,
    /// Member sources in priority-then-declaration order (shared, not owned).
    sources: Vec<Arc<Source>>,
    version_policy: VersionPolicy,
    group_cache: moka::sync::Cache<String, Arc<BTreeMap<String, BTreeSet<String>>>>,
    closure_cache: moka::sync::Cache<String, Arc<ClosureResult>>,
}

impl Collection {
    /// Build a collection over sources of one backend type. `sources` must
    /// already be in priority order; the registry guarantees this.
    pub fn new(sources: Vec<Arc<Source>>, arch: &str, version_policy: VersionPolicy) -> Self {
        debug_assert!(
            sources
                .iter()
                .map(|s| s.backend())
                .collect::<BTreeSet<_>>()
                .len()
                <= 1,
            "collection built over heterogeneous backends"
        );
        let backend = sources.first().map(|s| s.backend());
        let cachekey = Self::hash_key(&sources, arch);
        Self {
            cachekey,
            arch: arch.to_string(),
            backend,
            sources,
            version_policy,
            group_cache: moka::sync::Cache::new(256),
            closure_cache: moka::sync::Cache::new(4096),
        }
    }

    /// A transient no-op collection: no sources, no closure. Used while the
    /// registry is still loading and for clients with zero or heterogeneous
    /// source types.
    pub fn empty(arch: &str, version_policy: VersionPolicy) -> Self {
        Self::new(Vec::new(), arch, version_policy)
    }

    fn hash_key(sources: &[Arc<Source>], arch: &str) -> String {
        let mut hasher = Sha256::new();
        for source in sources {
            hasher.update(source.identity());
            hasher.update(b"\0");
        }
        hasher.update(arch);
        format!("{:x}", hasher.finalize())[..32].to_string()
    }

    /// Deterministic identity: hash of the ordered member source identities
    /// plus the client architecture.
    pub fn cachekey(&self) -> &str {
        &self.cachekey
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    /// Whether this collection can resolve anything at all.
    pub fn is_noop(&self) -> bool {
        self.backend.is_none()
    }

    pub fn backend(&self) -> Option<Backend> {
        self.backend
    }

    pub fn sources(&self) -> &[Arc<Source>] {
        &self.sources
    }

    /// Drop all memoized group and closure results. Called on Reload/Refresh;
    /// never during resolution.
    pub fn invalidate_caches(&self) {
        self.group_cache.invalidate_all();
        self.closure_cache.invalidate_all();
    }

    fn views(&self) -> Vec<SourceView> {
        self.sources
            .iter()
            .map(|source| SourceView {
                data: source.snapshot(),
                source: Arc::clone(source),
            })
            .collect()
    }

    /// Union of essential packages across member sources.
    pub fn essential_packages(&self) -> BTreeSet<String> {
        let mut essential = BTreeSet::new();
        for view in self.views() {
            if let Some(graph) = view.graph(&self.arch) {
                essential.extend(graph.essential.iter().cloned());
            }
        }
        essential
    }

    /// Expand named package groups into concrete package sets. The first
    /// source (in priority order) carrying a group is authoritative for it;
    /// unknown groups are logged and omitted from the result.
    pub fn resolve_groups(
        &self,
        requests: &[(String, Option<String>)],
    ) -> Arc<BTreeMap<String, BTreeSet<String>>> {
        let mut sorted: Vec<&(String, Option<String>)> = requests.iter().collect();
        sorted.sort();
        let key = sorted
            .iter()
            .map(|(g, t)| format!("{}\u{1}{}", g, t.as_deref().unwrap_or("")))
            .collect::<Vec<_>>()
            .join("\u{2}");

        if let Some(cached) = self.group_cache.get(&key) {
            return cached;
        }

        let views = self.views();
        let mut result = BTreeMap::new();
        for (group, _hint) in requests {
            let found = views
                .iter()
                .find_map(|v| v.graph(&self.arch).and_then(|g| g.groups.get(group)));
            match found {
                Some(members) => {
                    result.insert(group.clone(), members.clone());
                }
                None => warn!("Could not expand package group {}", group),
            }
        }
        let result = Arc::new(result);
        self.group_cache.insert(key, Arc::clone(&result));
        result
    }

    /// Compute the transitive dependency closure of `base`.
    ///
    /// Breadth-first over a work queue. For each popped name the first
    /// member source (priority order) listing it as a concrete package is
    /// authoritative for its dependency and recommends lists. Names that are
    /// neither concrete anywhere nor provided by anything land in `unknown`.
    /// Results are memoized under a key derived from the inputs; identical
    /// calls (for example from another client sharing this collection)
    /// return the cached pair.
    pub fn complete(
        &self,
        base: &BTreeSet<String>,
        recommended: &BTreeMap<String, bool>,
        pins: &BTreeMap<String, String>,
    ) -> Arc<ClosureResult> {
        let key = Self::closure_key(base, recommended, pins);
        if let Some(cached) = self.closure_cache.get(&key) {
            return cached;
        }

        // One snapshot per source for the whole walk.
        let views = self.views();

        let mut resolved: BTreeSet<String> = base.clone();
        let mut unknown: BTreeSet<String> = BTreeSet::new();
        let mut visited: HashSet<String> = base.iter().cloned().collect();
        let mut queue: VecDeque<String> = base.iter().cloned().collect();

        while let Some(current) = queue.pop_front() {
            let authoritative = views.iter().find_map(|v| {
                v.graph(&self.arch)
                    .filter(|g| g.packages.contains(&current))
                    .map(|g| (v, g))
            });

            let Some((view, graph)) = authoritative else {
                // Not a concrete package anywhere; maybe a virtual name from
                // the base set. Keep it in the output and chase a provider.
                match self.choose_provider(&views, &current, pins, &resolved) {
                    Some(ProviderChoice::Satisfied) => {}
                    Some(ProviderChoice::Chosen(provider)) => {
                        if visited.insert(provider.clone()) {
                            resolved.insert(provider.clone());
                            queue.push_back(provider);
                        }
                    }
                    None => {
                        unknown.insert(current.clone());
                        resolved.remove(&current);
                    }
                }
                continue;
            };

            if let Some(deps) = graph.deps.get(&current) {
                for dep in deps {
                    self.resolve_target(
                        dep, &views, pins, true, &mut resolved, &mut unknown, &mut visited,
                        &mut queue,
                    );
                }
            }

            let follow_recommends = recommended.get(&current).copied().unwrap_or(false)
                || view.source.recommended();
            if follow_recommends {
                if let Some(recs) = graph.recommends.get(&current) {
                    for rec in recs {
                        // Unresolvable recommends are dropped, never unknown.
                        self.resolve_target(
                            rec, &views, pins, false, &mut resolved, &mut unknown, &mut visited,
                            &mut queue,
                        );
                    }
                }
            }
        }

        let result = Arc::new(ClosureResult { resolved, unknown });
        self.closure_cache.insert(key, Arc::clone(&result));
        result
    }

    /// Resolve one dependency target: a concrete package, a provided virtual
    /// name, or unknown.
    #[allow(clippy::too_many_arguments)]
    fn resolve_target(
        &self,
        target: &str,
        views: &[SourceView],
        pins: &BTreeMap<String, String>,
        hard: bool,
        resolved: &mut BTreeSet<String>,
        unknown: &mut BTreeSet<String>,
        visited: &mut HashSet<String>,
        queue: &mut VecDeque<String>,
    ) {
        if visited.contains(target) {
            return;
        }
        let concrete = views.iter().any(|v| {
            v.graph(&self.arch)
                .map(|g| g.packages.contains(target))
                .unwrap_or(false)
        });
        if concrete {
            visited.insert(target.to_string());
            resolved.insert(target.to_string());
            queue.push_back(target.to_string());
            return;
        }
        match self.choose_provider(views, target, pins, resolved) {
            Some(ProviderChoice::Satisfied) => {
                visited.insert(target.to_string());
            }
            Some(ProviderChoice::Chosen(provider)) => {
                visited.insert(target.to_string());
                if visited.insert(provider.clone()) {
                    resolved.insert(provider.clone());
                    queue.push_back(provider);
                }
            }
            None => {
                if hard {
                    unknown.insert(target.to_string());
                }
            }
        }
    }

    /// Pick a provider for a virtual name. A pin selects the pinned source's
    /// candidate list; otherwise the first providing source in priority
    /// order is authoritative and its first-declared candidate wins. If a
    /// candidate is already resolved the choice is already satisfied.
    fn choose_provider(
        &self,
        views: &[SourceView],
        virt: &str,
        pins: &BTreeMap<String, String>,
        resolved: &BTreeSet<String>,
    ) -> Option<ProviderChoice> {
        let candidates: Option<&Vec<String>> = match pins.get(virt) {
            Some(pin) => views
                .iter()
                .find(|v| {
                    (v.source.base_url() == pin.as_str() || v.source.identity() == pin.as_str())
                        && v.graph(&self.arch)
                            .map(|g| g.provides.contains_key(virt))
                            .unwrap_or(false)
                })
                .and_then(|v| v.graph(&self.arch).and_then(|g| g.provides.get(virt))),
            None => None,
        }
        .or_else(|| {
            views
                .iter()
                .find_map(|v| v.graph(&self.arch).and_then(|g| g.provides.get(virt)))
        });

        let candidates = candidates?;
        if candidates.iter().any(|c| resolved.contains(c)) {
            return Some(ProviderChoice::Satisfied);
        }
        candidates.first().cloned().map(ProviderChoice::Chosen)
    }

    fn closure_key(
        base: &BTreeSet<String>,
        recommended: &BTreeMap<String, bool>,
        pins: &BTreeMap<String, String>,
    ) -> String {
        let mut hasher = Sha256::new();
        for name in base {
            hasher.update(name);
            hasher.update(b"\0");
        }
        hasher.update(b"\x01");
        for (name, flag) in recommended {
            hasher.update(name);
            hasher.update(if *flag { b"+" } else { b"-" });
        }
        hasher.update(b"\x01");
        for (name, pin) in pins {
            hasher.update(name);
            hasher.update(b"\0");
            hasher.update(pin);
            hasher.update(b"\0");
        }
        format!("{:x}", hasher.finalize())
    }

    /// Concrete package names an explicit request expands to. A plain name
    /// maps to itself; backends with multi-instance entries would expand
    /// here.
    pub fn packages_from_entry(&self, name: &str) -> Vec<String> {
        vec![name.to_string()]
    }

    /// `resolved − initial`, sorted, for deterministic output ordering.
    pub fn get_new_packages(
        &self,
        initial: &BTreeSet<String>,
        resolved: &BTreeSet<String>,
    ) -> Vec<String> {
        resolved.difference(initial).cloned().collect()
    }

    /// Serialize a package-name delta back into entries for the client's
    /// configuration output.
    pub fn packages_to_entry(&self, names: &[String]) -> Vec<PackageEntry> {
        let kind = self
            .backend
            .map(|b| b.entry_type())
            .unwrap_or("unknown")
            .to_string();
        names
            .iter()
            .map(|name| PackageEntry {
                name: name.clone(),
                kind: kind.clone(),
                version: self.version_policy.as_str().to_string(),
            })
            .collect()
    }

    /// Combined repository-definition file content for all member sources.
    pub fn build_config(&self) -> String {
        let mut lines = vec![
            "# This config was generated automatically by fleetpkg".to_string(),
            String::new(),
        ];
        for source in &self.sources {
            lines.push(source.build_repo_config());
        }
        lines.join("\n")
    }
}

enum ProviderChoice {
    /// An already-resolved package satisfies the virtual name.
    Satisfied,
    /// Nothing satisfies it yet; this candidate was selected.
    Chosen(String),
}
