//! Yum backend reader: repodata `primary.xml` files.
//!
//! Only the dependency-relevant subset of the schema is modeled; everything
//! else in a `<package>` element is ignored during deserialization. A file
//! covers every architecture in the repository, so entries are filtered to
//! the requested architecture plus `noarch`.

use super::GraphFragment;
use crate::error::Result;
use crate::fetch::gunzip_if_needed;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Metadata {
    #[serde(rename = "package", default)]
    packages: Vec<Package>,
}

#[derive(Debug, Deserialize)]
struct Package {
    name: String,
    arch: String,
    format: Option<Format>,
}

#[derive(Debug, Deserialize)]
struct Format {
    provides: Option<Entries>,
    requires: Option<Entries>,
    recommends: Option<Entries>,
}

#[derive(Debug, Deserialize)]
struct Entries {
    #[serde(rename = "entry", default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    name: String,
}

pub fn parse(raw: &[u8], arch: &str) -> Result<GraphFragment> {
    let bytes = gunzip_if_needed(raw)?;
    let metadata: Metadata = serde_xml_rs::from_reader(bytes.as_slice())?;

    let mut frag = GraphFragment::default();
    for pkg in metadata.packages {
        if pkg.arch != arch && pkg.arch != "noarch" {
            continue;
        }
        frag.packages.insert(pkg.name.clone());
        let deps = frag.deps.entry(pkg.name.clone()).or_default();
        let Some(format) = pkg.format else {
            continue;
        };
        if let Some(requires) = format.requires {
            for entry in requires.entries {
                // rpmlib() capabilities are satisfied by the package manager
                // itself, not by any package.
                if entry.name.starts_with("rpmlib(") {
                    continue;
                }
                if !deps.contains(&entry.name) {
                    deps.push(entry.name);
                }
            }
        }
        if let Some(recommends) = format.recommends {
            let recs = frag.recommends.entry(pkg.name.clone()).or_default();
            for entry in recommends.entries {
                if !recs.contains(&entry.name) {
                    recs.push(entry.name);
                }
            }
        }
        if let Some(provides) = format.provides {
            for entry in provides.entries {
                frag.add_provider(&entry.name, &pkg.name);
            }
        }
    }

    Ok(frag)
}
