//! Source registry: parses the repository-declaration document.
//!
//! The document is a `<Sources>` XML file that may pull in further files via
//! `<Include href="…"/>`. The registry tracks which included files parsed
//! successfully so the orchestrator only reloads repository data once the
//! whole document set has been ingested.
//!
//! Malformed or unrecognized declarations are skipped with a logged error;
//! only an unparseable root document is fatal.

use crate::error::{FleetError, Result};
use crate::readers::Backend;
use crate::source::{Source, SourceOptions};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::error;

const DEFAULT_PRIORITY: i32 = 500;

#[derive(Debug, Deserialize)]
struct SourcesDoc {
    #[serde(rename = "Include", default)]
    includes: Vec<IncludeDecl>,
    #[serde(rename = "Source", default)]
    sources: Vec<SourceDecl>,
}

#[derive(Debug, Deserialize)]
struct IncludeDecl {
    href: String,
}

/// Raw deserialized form of one `<Source>` element.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceDecl {
    #[serde(rename = "type", default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub rawurl: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub essential: Option<bool>,
    #[serde(default)]
    pub recommended: Option<bool>,
    #[serde(default)]
    pub debsrc: Option<bool>,
    #[serde(rename = "Component", default)]
    pub components: Vec<String>,
    #[serde(rename = "Arch", default)]
    pub arches: Vec<String>,
    #[serde(rename = "GPGKey", default)]
    pub gpg_keys: Vec<String>,
    #[serde(rename = "Group", default)]
    pub groups: Vec<String>,
}

pub struct SourceRegistry {
    root: PathBuf,
    cache_root: PathBuf,
    /// Files the document set is expected to contain (root plus includes).
    expected: BTreeSet<PathBuf>,
    /// Files parsed successfully during the last reload.
    parsed: BTreeSet<PathBuf>,
    sources: Vec<Arc<Source>>,
}

impl SourceRegistry {
    /// Parse the document set rooted at `sources_path`.
    ///
    /// Fails only when the root document itself cannot be read or parsed.
    pub fn load(sources_path: impl Into<PathBuf>, cache_root: impl Into<PathBuf>) -> Result<Self> {
        let mut registry = Self {
            root: sources_path.into(),
            cache_root: cache_root.into(),
            expected: BTreeSet::new(),
            parsed: BTreeSet::new(),
            sources: Vec::new(),
        };
        registry.reload()?;
        Ok(registry)
    }

    /// Re-parse the whole document set. Call this from the change
    /// notification callback; check [`is_fully_loaded`](Self::is_fully_loaded)
    /// afterwards to decide whether to trigger a data reload.
    pub fn reload(&mut self) -> Result<()> {
        self.expected.clear();
        self.parsed.clear();
        let mut decls = Vec::new();

        let root = self.root.clone();
        self.expected.insert(root.clone());
        self.parse_file(&root, &mut decls, true)?;

        let mut sources = Vec::new();
        for decl in decls {
            if let Some(source) = self.build_source(decl) {
                sources.push(Arc::new(source));
            }
        }
        // Descending priority; the stable sort keeps declaration order for
        // ties. This ordering is the authoritative resolution precedence.
        sources.sort_by_key(|s| std::cmp::Reverse(s.priority()));
        self.sources = sources;
        Ok(())
    }

    fn parse_file(&mut self, path: &Path, decls: &mut Vec<SourceDecl>, fatal: bool) -> Result<()> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                if fatal {
                    return Err(e.into());
                }
                error!("Could not read included sources file {}: {}", path.display(), e);
                return Ok(());
            }
        };
        let doc: SourcesDoc = match serde_xml_rs::from_str(&text) {
            Ok(doc) => doc,
            Err(e) => {
                if fatal {
                    return Err(e.into());
                }
                error!("Could not parse included sources file {}: {}", path.display(), e);
                return Ok(());
            }
        };
        self.parsed.insert(path.to_path_buf());

        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        for include in doc.includes {
            let child = base.join(&include.href);
            if self.expected.insert(child.clone()) {
                // Includes of includes are allowed; cycles are broken by the
                // expected-set check above.
                self.parse_file(&child, decls, false)?;
            }
        }
        decls.extend(doc.sources);
        Ok(())
    }

    /// True exactly when every file named by the document set has been
    /// parsed successfully.
    pub fn is_fully_loaded(&self) -> bool {
        self.expected == self.parsed
    }

    /// Instantiate the right source type for a declaration, or `None` when
    /// the declaration is unusable (the caller skips it).
    fn build_source(&self, decl: SourceDecl) -> Option<Source> {
        let location = decl
            .rawurl
            .clone()
            .or_else(|| decl.url.clone())
            .unwrap_or_else(|| "<no url>".to_string());
        let Some(tag) = decl.backend.as_deref() else {
            error!("No type specified for source at {}, skipping", location);
            return None;
        };
        let Some(backend) = Backend::from_tag(tag) else {
            error!("Unknown source type {} at {}, skipping", tag, location);
            return None;
        };

        let opts = SourceOptions {
            backend,
            url: decl.url,
            rawurl: decl.rawurl,
            version: decl.version.unwrap_or_default(),
            components: decl.components,
            arches: decl.arches,
            priority: decl.priority.unwrap_or(DEFAULT_PRIORITY),
            essential: decl.essential.unwrap_or(true),
            recommended: decl.recommended.unwrap_or(false),
            debsrc: decl.debsrc.unwrap_or(false),
            gpg_keys: decl.gpg_keys,
            groups: decl.groups.into_iter().collect(),
        };
        match Source::new(opts, &self.cache_root) {
            Ok(source) => Some(source),
            Err(FleetError::SourceInit(msg)) => {
                error!("Skipping source at {}: {}", location, msg);
                None
            }
            Err(e) => {
                error!("Skipping source at {}: {}", location, e);
                None
            }
        }
    }

    /// All sources, sorted by descending priority then declaration order.
    pub fn sources(&self) -> &[Arc<Source>] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
