// Backend reader coverage: each format parses into the canonical fragment.

use fleetpkg::readers::{choice_name, Backend};

mod apt_reader {
    use super::*;

    const INDEX: &str = "\
Package: web
Depends: nginx | apache, libssl (>= 1.1), zlib:any
Recommends: certbot
Provides: httpd-server

Package: libssl
Essential: yes

Package: zlib
";

    #[test]
    fn parses_packages_and_plain_deps() {
        let frag = Backend::Apt.parse(INDEX.as_bytes(), "amd64").unwrap();
        assert!(frag.packages.contains("web"));
        assert!(frag.packages.contains("libssl"));
        let deps = &frag.deps["web"];
        assert!(deps.contains(&"libssl".to_string()), "version stripped: {:?}", deps);
        assert!(deps.contains(&"zlib".to_string()), ":any stripped: {:?}", deps);
    }

    #[test]
    fn lowers_or_groups_to_synthetic_provides() {
        let frag = Backend::Apt.parse(INDEX.as_bytes(), "amd64").unwrap();
        let dyn_name = choice_name("web", "amd64", 0);
        assert!(frag.deps["web"].contains(&dyn_name));
        assert_eq!(
            frag.provides[&dyn_name],
            vec!["nginx".to_string(), "apache".to_string()],
            "alternatives keep declaration order"
        );
        // The synthetic name never becomes an installable package.
        assert!(!frag.packages.contains(&dyn_name));
    }

    #[test]
    fn separates_recommends_from_hard_deps() {
        let frag = Backend::Apt.parse(INDEX.as_bytes(), "amd64").unwrap();
        assert_eq!(frag.recommends["web"], vec!["certbot".to_string()]);
        assert!(!frag.deps["web"].contains(&"certbot".to_string()));
    }

    #[test]
    fn records_provides_and_essential() {
        let frag = Backend::Apt.parse(INDEX.as_bytes(), "amd64").unwrap();
        assert_eq!(frag.provides["httpd-server"], vec!["web".to_string()]);
        assert!(frag.essential.contains("libssl"));
        assert!(!frag.essential.contains("web"));
    }

    #[test]
    fn field_before_stanza_is_a_format_error() {
        let bad = "Depends: something\n";
        assert!(Backend::Apt.parse(bad.as_bytes(), "amd64").is_err());
    }

    #[test]
    fn or_groups_in_recommends_are_lowered_too() {
        let index = "Package: mail\nRecommends: mutt | neomutt\n";
        let frag = Backend::Apt.parse(index.as_bytes(), "amd64").unwrap();
        let dyn_name = choice_name("mail", "amd64", 0);
        assert_eq!(frag.recommends["mail"], vec![dyn_name.clone()]);
        assert_eq!(
            frag.provides[&dyn_name],
            vec!["mutt".to_string(), "neomutt".to_string()]
        );
    }
}

mod pkgng_reader {
    use super::*;
    use std::io::Write;

    const LINES: &str = concat!(
        r#"{"name":"nginx","version":"1.24.0","deps":{"pcre2":{"origin":"devel/pcre2","version":"10.42"},"openssl":{"origin":"security/openssl","version":"3.0"}}}"#,
        "\n",
        r#"{"name":"pcre2","version":"10.42"}"#,
        "\n",
    );

    #[test]
    fn parses_json_lines() {
        let frag = Backend::Pkgng.parse(LINES.as_bytes(), "amd64").unwrap();
        assert!(frag.packages.contains("nginx"));
        assert!(frag.packages.contains("pcre2"));
        let deps = &frag.deps["nginx"];
        assert!(deps.contains(&"pcre2".to_string()));
        assert!(deps.contains(&"openssl".to_string()));
        assert!(frag.deps["pcre2"].is_empty());
    }

    #[test]
    fn parses_packagesite_tarball() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(LINES.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "packagesite.yaml", LINES.as_bytes())
            .unwrap();
        let tarball = builder.into_inner().unwrap();

        let frag = Backend::Pkgng.parse(&tarball, "amd64").unwrap();
        assert!(frag.packages.contains("nginx"));
    }

    #[test]
    fn gzipped_index_is_accepted() {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(LINES.as_bytes()).unwrap();
        let gz = encoder.finish().unwrap();

        let frag = Backend::Pkgng.parse(&gz, "amd64").unwrap();
        assert!(frag.packages.contains("pcre2"));
    }

    #[test]
    fn malformed_line_is_a_format_error() {
        let bad = "{\"name\": \"x\"\n";
        assert!(Backend::Pkgng.parse(bad.as_bytes(), "amd64").is_err());
    }
}

mod pacman_reader {
    use super::*;

    fn sync_db(descs: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (dir, desc) in descs {
            let mut header = tar::Header::new_gnu();
            header.set_size(desc.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("{}/desc", dir), desc.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn parses_desc_files() {
        let db = sync_db(&[
            (
                "vim-9.0-1",
                "%NAME%\nvim\n\n%DEPENDS%\nlibgcrypt>=1.10\nglibc\n\n%GROUPS%\neditors\n",
            ),
            (
                "glibc-2.38-1",
                "%NAME%\nglibc\n\n%PROVIDES%\nlibc=2.38\n",
            ),
        ]);
        let frag = Backend::Pacman.parse(&db, "x86_64").unwrap();
        assert!(frag.packages.contains("vim"));
        assert_eq!(
            frag.deps["vim"],
            vec!["libgcrypt".to_string(), "glibc".to_string()],
            "version comparators stripped"
        );
        assert_eq!(frag.provides["libc"], vec!["glibc".to_string()]);
        assert!(frag.groups["editors"].contains("vim"));
    }

    #[test]
    fn optdepends_become_recommends() {
        let db = sync_db(&[(
            "gvim-9.0-1",
            "%NAME%\ngvim\n\n%OPTDEPENDS%\npython: scripting support\n",
        )]);
        let frag = Backend::Pacman.parse(&db, "x86_64").unwrap();
        assert_eq!(frag.recommends["gvim"], vec!["python".to_string()]);
    }

    #[test]
    fn desc_without_name_is_a_format_error() {
        let db = sync_db(&[("broken-1.0-1", "%DEPENDS%\nglibc\n")]);
        assert!(Backend::Pacman.parse(&db, "x86_64").is_err());
    }
}

mod yum_reader {
    use super::*;

    const PRIMARY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="2">
  <package type="rpm">
    <name>httpd</name>
    <arch>x86_64</arch>
    <format>
      <rpm:provides>
        <rpm:entry name="httpd"/>
        <rpm:entry name="webserver"/>
      </rpm:provides>
      <rpm:requires>
        <rpm:entry name="openssl-libs"/>
        <rpm:entry name="rpmlib(CompressedFileNames)"/>
      </rpm:requires>
    </format>
  </package>
  <package type="rpm">
    <name>openssl-libs</name>
    <arch>i686</arch>
    <format>
      <rpm:provides>
        <rpm:entry name="openssl-libs"/>
      </rpm:provides>
    </format>
  </package>
</metadata>
"#;

    #[test]
    fn parses_requires_and_provides() {
        let frag = Backend::Yum.parse(PRIMARY.as_bytes(), "x86_64").unwrap();
        assert!(frag.packages.contains("httpd"));
        assert_eq!(frag.deps["httpd"], vec!["openssl-libs".to_string()]);
        assert_eq!(frag.provides["webserver"], vec!["httpd".to_string()]);
    }

    #[test]
    fn filters_foreign_architectures() {
        let frag = Backend::Yum.parse(PRIMARY.as_bytes(), "x86_64").unwrap();
        assert!(
            !frag.packages.contains("openssl-libs"),
            "i686 entry must not leak into the x86_64 graph"
        );
    }

    #[test]
    fn invalid_xml_is_an_error() {
        assert!(Backend::Yum.parse(b"<metadata><package>", "x86_64").is_err());
    }
}
