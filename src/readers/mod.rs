//! Backend readers: per-format parsers for repository index data.
//!
//! Each reader converts raw index bytes into a [`GraphFragment`], the
//! canonical per-architecture dependency graph this crate resolves against.
//! Readers never mutate shared state; they return a fresh fragment or a
//! [`Format`](crate::error::FleetError::Format) error.
//!
//! OR-dependencies ("a | b | c") are lowered uniformly: the reader
//! synthesizes a per-occurrence virtual name via [`choice_name`], records the
//! alternatives as its providers, and emits a single concrete dependency on
//! the synthetic name. The closure algorithm then treats OR-groups exactly
//! like ordinary virtual packages.

pub mod apt;
pub mod pacman;
pub mod pkgng;
pub mod yum;

use crate::error::Result;
use std::collections::{BTreeSet, HashMap};

/// The closed set of supported repository backends.
///
/// Dispatch is an explicit tag-to-parser table populated at compile time; an
/// unrecognized tag in a source declaration is a skippable error, never a
/// dynamic lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Backend {
    Apt,
    Yum,
    Pacman,
    Pkgng,
}

impl Backend {
    /// Look up a backend by its declaration tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "apt" => Some(Backend::Apt),
            "yum" => Some(Backend::Yum),
            "pac" | "pacman" => Some(Backend::Pacman),
            "pkgng" => Some(Backend::Pkgng),
            _ => None,
        }
    }

    /// The `type` tag stamped onto emitted package entries.
    pub fn entry_type(&self) -> &'static str {
        match self {
            Backend::Apt => "deb",
            Backend::Yum => "rpm",
            Backend::Pacman => "pacman",
            Backend::Pkgng => "pkgng",
        }
    }

    /// Parse one raw index file for the given architecture.
    pub fn parse(&self, raw: &[u8], arch: &str) -> Result<GraphFragment> {
        match self {
            Backend::Apt => apt::parse(raw, arch),
            Backend::Yum => yum::parse(raw, arch),
            Backend::Pacman => pacman::parse(raw, arch),
            Backend::Pkgng => pkgng::parse(raw, arch),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Backend::Apt => "apt",
            Backend::Yum => "yum",
            Backend::Pacman => "pacman",
            Backend::Pkgng => "pkgng",
        };
        f.write_str(tag)
    }
}

/// Canonical per-architecture dependency graph fragment produced by a reader.
#[derive(Debug, Clone, Default)]
pub struct GraphFragment {
    /// Package name to its hard dependency list. Alternatives have already
    /// been lowered to synthetic virtual names.
    pub deps: HashMap<String, Vec<String>>,
    /// Package name to its optional recommendation list.
    pub recommends: HashMap<String, Vec<String>>,
    /// Virtual name to its providing candidates, in declaration order.
    pub provides: HashMap<String, Vec<String>>,
    /// Every concrete (installable) package name in this fragment.
    pub packages: BTreeSet<String>,
    /// Packages the distribution marks essential/mandatory.
    pub essential: BTreeSet<String>,
    /// Named package groups, for backends whose indices carry group data.
    pub groups: HashMap<String, BTreeSet<String>>,
}

impl GraphFragment {
    /// Merge another fragment for the same architecture into this one.
    /// Later data never displaces earlier declarations, keeping provider
    /// tie-breaks in declaration order.
    pub fn merge(&mut self, other: GraphFragment) {
        for (pkg, deps) in other.deps {
            self.deps.entry(pkg).or_insert(deps);
        }
        for (pkg, recs) in other.recommends {
            self.recommends.entry(pkg).or_insert(recs);
        }
        for (virt, candidates) in other.provides {
            let existing = self.provides.entry(virt).or_default();
            for c in candidates {
                if !existing.contains(&c) {
                    existing.push(c);
                }
            }
        }
        self.packages.extend(other.packages);
        self.essential.extend(other.essential);
        for (group, members) in other.groups {
            self.groups.entry(group).or_default().extend(members);
        }
    }

    /// Record a provider for a virtual name, preserving declaration order.
    pub(crate) fn add_provider(&mut self, virt: &str, candidate: &str) {
        let entry = self.provides.entry(virt.to_string()).or_default();
        if !entry.iter().any(|c| c == candidate) {
            entry.push(candidate.to_string());
        }
    }
}

/// Synthetic virtual name for the `index`-th OR-group in `pkg`'s dependency
/// list on `arch`. Stable across parses of identical input.
pub fn choice_name(pkg: &str, arch: &str, index: usize) -> String {
    format!("choice-{}-{}-{}", pkg, arch, index)
}
