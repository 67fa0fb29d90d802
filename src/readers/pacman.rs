//! Pacman backend reader: sync database files.
//!
//! A sync db is a (usually gzipped) tar archive with one `<name>-<version>/`
//! directory per package holding a `desc` file of `%SECTION%` blocks. We
//! consume `%NAME%`, `%DEPENDS%`, `%OPTDEPENDS%`, `%PROVIDES%` and
//! `%GROUPS%`.

use super::GraphFragment;
use crate::error::{FleetError, Result};
use crate::fetch::gunzip_if_needed;
use std::io::Read;

/// Strip a version comparator ("glibc>=2.27") from a dependency atom.
fn clean_atom(raw: &str) -> &str {
    let end = raw
        .find(|c| c == '<' || c == '>' || c == '=')
        .unwrap_or(raw.len());
    raw[..end].trim()
}

pub fn parse(raw: &[u8], _arch: &str) -> Result<GraphFragment> {
    let bytes = gunzip_if_needed(raw)?;
    let mut archive = tar::Archive::new(bytes.as_slice());

    let mut frag = GraphFragment::default();
    let entries = archive
        .entries()
        .map_err(|e| FleetError::Format(format!("unreadable sync db: {}", e)))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| FleetError::Format(format!("unreadable sync db entry: {}", e)))?;
        let path = entry
            .path()
            .map_err(|e| FleetError::Format(format!("bad entry path: {}", e)))?;
        if path.file_name().and_then(|n| n.to_str()) != Some("desc") {
            continue;
        }
        let mut desc = String::new();
        entry
            .read_to_string(&mut desc)
            .map_err(|e| FleetError::Format(format!("unreadable desc file: {}", e)))?;
        parse_desc(&desc, &mut frag)?;
    }

    Ok(frag)
}

fn parse_desc(desc: &str, frag: &mut GraphFragment) -> Result<()> {
    let mut section = "";
    let mut name: Option<String> = None;
    let mut depends = Vec::new();
    let mut optdepends = Vec::new();
    let mut provides = Vec::new();
    let mut groups = Vec::new();

    for line in desc.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('%') && line.ends_with('%') {
            section = line.trim_matches('%');
            continue;
        }
        match section {
            "NAME" => name = Some(line.to_string()),
            "DEPENDS" => depends.push(clean_atom(line).to_string()),
            // "pkg: why you might want it"
            "OPTDEPENDS" => {
                let atom = line.split(':').next().unwrap_or(line);
                optdepends.push(clean_atom(atom).to_string());
            }
            "PROVIDES" => provides.push(clean_atom(line).to_string()),
            "GROUPS" => groups.push(line.to_string()),
            _ => {}
        }
    }

    let name =
        name.ok_or_else(|| FleetError::Format("desc file without %NAME% section".into()))?;
    frag.packages.insert(name.clone());
    frag.deps.insert(name.clone(), depends);
    frag.recommends.insert(name.clone(), optdepends);
    for virt in provides {
        frag.add_provider(&virt, &name);
    }
    for group in groups {
        frag.groups.entry(group).or_default().insert(name.clone());
    }
    Ok(())
}
