//! Client-facing data model.
//!
//! The external matching engine hands us a [`ClientProfile`] plus the
//! declared structures (bundles) that apply to the host. We only consume the
//! package and group requests inside them; everything else in a structure is
//! opaque to this crate.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Everything we need to know about one client to pick its sources and run
/// resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientProfile {
    pub hostname: String,
    /// Group membership as decided by the external matching engine.
    pub groups: BTreeSet<String>,
    /// Target architecture, e.g. `amd64` or `x86_64`.
    pub arch: String,
    /// Optional per-client pin table: package or virtual name to the source
    /// (by base URL) that must satisfy it.
    #[serde(default)]
    pub pins: BTreeMap<String, String>,
}

impl ClientProfile {
    pub fn new(hostname: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            arch: arch.into(),
            ..Default::default()
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }
}

/// One package or package-group request declared in a structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageRequest {
    /// An explicit package by name.
    Package {
        name: String,
        /// Whether optional recommendations of this package should be
        /// followed during closure.
        #[serde(default)]
        recommended: Option<bool>,
    },
    /// A named package group, expanded by the backend.
    Group {
        name: String,
        /// Backend-specific member-type hint (e.g. comps "optional").
        #[serde(default)]
        kind: Option<String>,
        /// `choose` annotation set in pass-through mode.
        #[serde(default)]
        choose: Option<String>,
    },
}

/// A declared structure (bundle): a named bag of requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Structure {
    pub name: String,
    pub requests: Vec<PackageRequest>,
}

impl Structure {
    pub fn new(name: impl Into<String>, requests: Vec<PackageRequest>) -> Self {
        Self {
            name: name.into(),
            requests,
        }
    }
}

/// One implied package emitted by resolution, ready to be serialized back
/// into the client's configuration output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageEntry {
    pub name: String,
    /// Resolved backend type tag (`deb`, `rpm`, `pacman`, `pkgng`).
    pub kind: String,
    /// Version policy attribute (`auto` or `any`).
    pub version: String,
}

/// Result of resolving one client's declared structures.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Implied packages not present in the initial request set, sorted.
    pub entries: Vec<PackageEntry>,
    /// Names referenced but resolvable in no applicable source.
    pub unknown: Vec<String>,
}
