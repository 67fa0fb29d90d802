//! APT backend reader: Debian `Packages` index files.
//!
//! Stanza-oriented RFC822-style format. We consume `Package`, `Essential`,
//! `Depends`, `Pre-Depends`, `Recommends` and `Provides` fields; version
//! constraints in parentheses are informational only and stripped.

use super::{choice_name, GraphFragment};
use crate::error::{FleetError, Result};
use crate::fetch::gunzip_if_needed;

/// Remove the `:any` multiarch suffix from a dependency name if present.
fn strip_suffix(name: &str) -> &str {
    name.strip_suffix(":any").unwrap_or(name)
}

/// Strip a trailing version constraint ("pkg (>= 1.2)") and whitespace.
fn clean_dep(raw: &str) -> String {
    let no_version = match raw.find('(') {
        Some(start) => {
            let rest = &raw[start..];
            match rest.find(')') {
                Some(end) => format!("{}{}", &raw[..start], &rest[end + 1..]),
                None => raw[..start].to_string(),
            }
        }
        None => raw.to_string(),
    };
    strip_suffix(no_version.trim()).to_string()
}

pub fn parse(raw: &[u8], arch: &str) -> Result<GraphFragment> {
    let bytes = gunzip_if_needed(raw)?;
    let text = String::from_utf8_lossy(&bytes);

    let mut frag = GraphFragment::default();
    let mut current: Option<String> = None;
    let mut choice_index = 0usize;

    for line in text.lines() {
        // Continuation lines belong to fields we don't consume.
        if line.starts_with(' ') || line.starts_with('\t') {
            continue;
        }
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match field {
            "Package" => {
                let pkgname = value.to_string();
                frag.packages.insert(pkgname.clone());
                frag.deps.entry(pkgname.clone()).or_default();
                frag.recommends.entry(pkgname.clone()).or_default();
                current = Some(pkgname);
                choice_index = 0;
            }
            "Essential" => {
                let pkgname = stanza_package(&current, field)?;
                if value == "yes" {
                    frag.essential.insert(pkgname.to_string());
                }
            }
            "Depends" | "Pre-Depends" | "Recommends" => {
                let pkgname = stanza_package(&current, field)?.to_string();
                let recommends = field == "Recommends";
                for dep in value.split(',') {
                    if dep.trim().is_empty() {
                        continue;
                    }
                    let target = if dep.contains('|') {
                        // Lower the OR-group to a synthetic virtual name
                        // provided by each alternative.
                        let dyn_name = choice_name(&pkgname, arch, choice_index);
                        choice_index += 1;
                        for alt in dep.split('|') {
                            frag.add_provider(&dyn_name, &clean_dep(alt));
                        }
                        dyn_name
                    } else {
                        clean_dep(dep)
                    };
                    let list = if recommends {
                        frag.recommends.entry(pkgname.clone()).or_default()
                    } else {
                        frag.deps.entry(pkgname.clone()).or_default()
                    };
                    list.push(target);
                }
            }
            "Provides" => {
                let pkgname = stanza_package(&current, field)?.to_string();
                for virt in value.split(',') {
                    let virt = clean_dep(virt);
                    if !virt.is_empty() {
                        frag.add_provider(&virt, &pkgname);
                    }
                }
            }
            _ => {}
        }
    }

    Ok(frag)
}

fn stanza_package<'a>(current: &'a Option<String>, field: &str) -> Result<&'a str> {
    current.as_deref().ok_or_else(|| {
        FleetError::Format(format!("{} field before any Package stanza", field))
    })
}
