//! pkgng backend reader: FreeBSD `packagesite` files.
//!
//! The repository ships a tar archive containing `packagesite.yaml`, which is
//! really one JSON document per line. A bare JSON-lines file (already
//! extracted) is accepted too.

use super::GraphFragment;
use crate::error::{FleetError, Result};
use crate::fetch::gunzip_if_needed;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;

#[derive(Debug, Deserialize)]
struct SiteEntry {
    name: String,
    #[serde(default)]
    deps: BTreeMap<String, serde_json::Value>,
}

pub fn parse(raw: &[u8], _arch: &str) -> Result<GraphFragment> {
    let bytes = gunzip_if_needed(raw)?;
    let manifest = extract_manifest(&bytes)?;

    let mut frag = GraphFragment::default();
    for line in manifest.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry: SiteEntry = serde_json::from_str(line)
            .map_err(|e| FleetError::Format(format!("bad packagesite line: {}", e)))?;
        frag.packages.insert(entry.name.clone());
        frag.deps
            .insert(entry.name.clone(), entry.deps.keys().cloned().collect());
    }

    Ok(frag)
}

/// Pull `packagesite.yaml` out of the tarball, or treat the input as the
/// manifest itself when it isn't a tar archive.
fn extract_manifest(bytes: &[u8]) -> Result<String> {
    let mut archive = tar::Archive::new(bytes);
    if let Ok(entries) = archive.entries() {
        for entry in entries {
            let Ok(mut entry) = entry else { break };
            let is_manifest = entry
                .path()
                .ok()
                .and_then(|p| p.file_name().map(|n| n == "packagesite.yaml"))
                .unwrap_or(false);
            if is_manifest {
                let mut manifest = String::new();
                entry
                    .read_to_string(&mut manifest)
                    .map_err(|e| FleetError::Format(format!("unreadable packagesite: {}", e)))?;
                return Ok(manifest);
            }
        }
    }
    String::from_utf8(bytes.to_vec())
        .map_err(|_| FleetError::Format("packagesite is neither tar nor UTF-8 JSON lines".into()))
}
