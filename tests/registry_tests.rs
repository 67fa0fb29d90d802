// Sources-document parsing: includes, skip-on-error, priority ordering.

use fleetpkg::{ClientProfile, SourceRegistry};
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn parses_sources_sorted_by_descending_priority() {
    let tmp = TempDir::new().unwrap();
    let path = write(
        &tmp,
        "sources.xml",
        r#"<Sources>
  <Source type="apt" url="http://low.example/" version="stable" priority="100">
    <Component>main</Component>
    <Arch>amd64</Arch>
  </Source>
  <Source type="apt" url="http://high.example/" version="stable" priority="900">
    <Component>main</Component>
    <Arch>amd64</Arch>
  </Source>
</Sources>"#,
    );

    let registry = SourceRegistry::load(path, tmp.path().join("cache")).unwrap();
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.sources()[0].priority(), 900);
    assert_eq!(registry.sources()[1].priority(), 100);
    assert!(registry.is_fully_loaded());
}

#[test]
fn declaration_order_breaks_priority_ties() {
    let tmp = TempDir::new().unwrap();
    let path = write(
        &tmp,
        "sources.xml",
        r#"<Sources>
  <Source type="apt" url="http://first.example/" version="stable">
    <Component>main</Component>
    <Arch>amd64</Arch>
  </Source>
  <Source type="apt" url="http://second.example/" version="stable">
    <Component>main</Component>
    <Arch>amd64</Arch>
  </Source>
</Sources>"#,
    );

    let registry = SourceRegistry::load(path, tmp.path().join("cache")).unwrap();
    assert_eq!(registry.sources()[0].base_url(), "http://first.example/");
    assert_eq!(registry.sources()[1].base_url(), "http://second.example/");
}

#[test]
fn bad_declarations_are_skipped_not_fatal() {
    let tmp = TempDir::new().unwrap();
    let path = write(
        &tmp,
        "sources.xml",
        r#"<Sources>
  <Source type="frobnicator" url="http://weird.example/" version="1">
    <Arch>amd64</Arch>
  </Source>
  <Source type="apt" version="stable">
    <Arch>amd64</Arch>
  </Source>
  <Source url="http://untyped.example/" version="stable">
    <Arch>amd64</Arch>
  </Source>
  <Source type="apt" url="http://good.example/" version="stable">
    <Component>main</Component>
    <Arch>amd64</Arch>
  </Source>
</Sources>"#,
    );

    // Unknown backend, missing url/rawurl, and missing type are each
    // skipped; the one good declaration survives.
    let registry = SourceRegistry::load(path, tmp.path().join("cache")).unwrap();
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.sources()[0].base_url(), "http://good.example/");
}

#[test]
fn nested_includes_are_resolved() {
    let tmp = TempDir::new().unwrap();
    write(
        &tmp,
        "extra.xml",
        r#"<Sources>
  <Source type="apt" url="http://extra.example/" version="stable" priority="800">
    <Component>main</Component>
    <Arch>amd64</Arch>
  </Source>
</Sources>"#,
    );
    let path = write(
        &tmp,
        "sources.xml",
        r#"<Sources>
  <Include href="extra.xml"/>
  <Source type="apt" url="http://root.example/" version="stable" priority="500">
    <Component>main</Component>
    <Arch>amd64</Arch>
  </Source>
</Sources>"#,
    );

    let registry = SourceRegistry::load(path, tmp.path().join("cache")).unwrap();
    assert!(registry.is_fully_loaded());
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.sources()[0].base_url(), "http://extra.example/");
}

#[test]
fn missing_include_leaves_document_partially_loaded() {
    let tmp = TempDir::new().unwrap();
    let path = write(
        &tmp,
        "sources.xml",
        r#"<Sources>
  <Include href="nonexistent.xml"/>
  <Source type="apt" url="http://root.example/" version="stable">
    <Component>main</Component>
    <Arch>amd64</Arch>
  </Source>
</Sources>"#,
    );

    let registry = SourceRegistry::load(path, tmp.path().join("cache")).unwrap();
    assert!(!registry.is_fully_loaded());
    // Sources parsed so far are still available.
    assert_eq!(registry.len(), 1);
}

#[test]
fn unreadable_root_document_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.xml");
    assert!(SourceRegistry::load(missing, tmp.path().join("cache")).is_err());

    let garbage = write(&tmp, "garbage.xml", "<Sources><Source</Sources>");
    assert!(SourceRegistry::load(garbage, tmp.path().join("cache")).is_err());
}

#[test]
fn applicability_requires_all_groups_and_a_served_arch() {
    let tmp = TempDir::new().unwrap();
    let path = write(
        &tmp,
        "sources.xml",
        r#"<Sources>
  <Source type="apt" url="http://debian.example/" version="stable">
    <Component>main</Component>
    <Arch>amd64</Arch>
    <Group>debian</Group>
    <Group>web</Group>
  </Source>
</Sources>"#,
    );
    let registry = SourceRegistry::load(path, tmp.path().join("cache")).unwrap();
    let source = &registry.sources()[0];

    let matching =
        ClientProfile::new("host1", "amd64").with_groups(["debian", "web", "extra"]);
    assert!(source.applies(&matching));

    let missing_group = ClientProfile::new("host2", "amd64").with_groups(["debian"]);
    assert!(!source.applies(&missing_group));

    let wrong_arch =
        ClientProfile::new("host3", "s390x").with_groups(["debian", "web"]);
    assert!(!source.applies(&wrong_arch));
}

#[test]
fn source_attributes_round_trip_from_xml() {
    let tmp = TempDir::new().unwrap();
    let path = write(
        &tmp,
        "sources.xml",
        r#"<Sources>
  <Source type="apt" url="http://debian.example" version="bookworm" priority="650" debsrc="true">
    <Component>main</Component>
    <Component>contrib</Component>
    <Arch>amd64</Arch>
    <GPGKey>http://debian.example/archive-key.gpg</GPGKey>
  </Source>
</Sources>"#,
    );
    let registry = SourceRegistry::load(path, tmp.path().join("cache")).unwrap();
    let source = &registry.sources()[0];
    assert_eq!(source.priority(), 650);
    // Trailing slash is normalized onto the base URL.
    assert_eq!(source.base_url(), "http://debian.example/");
    assert_eq!(source.gpg_keys(), ["http://debian.example/archive-key.gpg"]);
    let config = source.build_repo_config();
    assert!(config.contains("deb http://debian.example/ bookworm main contrib"));
    assert!(config.contains("deb-src http://debian.example/ bookworm main contrib"));
}
