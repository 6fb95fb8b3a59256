//! Property tests for the sandbox and installer invariants: path
//! containment, zip-slip rejection, and the SHA-256 integrity gate.

use proptest::prelude::*;
use shisho::plugins::host::{extract_zip_file, validate_domain};
use shisho::plugins::installer::{sha256_hex, verify_sha256};
use shisho::plugins::sandbox::is_within;
use std::io::Write;
use std::path::Path;

fn segment() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9][a-zA-Z0-9_.-]{0,11}"
        .prop_filter("no dot dirs", |s| s.as_str() != "." && s.as_str() != "..")
}

proptest! {
    #[test]
    fn within_holds_for_descendants(
        parent_segments in prop::collection::vec(segment(), 1..4),
        child_segments in prop::collection::vec(segment(), 0..4),
    ) {
        let mut parent = std::path::PathBuf::from("/");
        for part in &parent_segments {
            parent.push(part);
        }
        let mut child = parent.clone();
        for part in &child_segments {
            child.push(part);
        }
        prop_assert!(is_within(&child, &parent));
        // equality is within; strict ancestors of parent are not
        prop_assert!(is_within(&parent, &parent));
        if !child_segments.is_empty() {
            prop_assert!(!is_within(&parent, &child));
        }
    }

    #[test]
    fn within_rejects_sibling_name_prefixes(
        base in segment(),
        suffix in "[a-zA-Z0-9]{1,6}",
    ) {
        let parent = format!("/data/{base}");
        let sibling = format!("/data/{base}{suffix}");
        prop_assert!(!is_within(Path::new(&sibling), Path::new(&parent)));
    }

    #[test]
    fn within_rejects_dot_dot_escapes(
        parent_segments in prop::collection::vec(segment(), 1..3),
        escape_depth in 1usize..5,
        target in segment(),
    ) {
        let mut parent = std::path::PathBuf::from("/srv");
        for part in &parent_segments {
            parent.push(part);
        }
        let mut escapee = parent.clone();
        for _ in 0..(parent.components().count() + escape_depth) {
            escapee.push("..");
        }
        escapee.push(&target);
        prop_assert!(!is_within(&escapee, &parent));
    }

    #[test]
    fn integrity_gate_accepts_only_the_real_hash(
        data in prop::collection::vec(any::<u8>(), 0..512),
        tampered_byte in any::<u8>(),
    ) {
        let good = sha256_hex(&data);
        prop_assert!(verify_sha256(&data, &good).is_ok());
        prop_assert!(verify_sha256(&data, &good.to_uppercase()).is_ok());

        let mut tampered = data.clone();
        tampered.push(tampered_byte);
        let err = verify_sha256(&tampered, &good).unwrap_err();
        prop_assert_eq!(err.kind(), "IntegrityMismatch");
    }

    #[test]
    fn zip_slip_archives_never_extract(
        escape_depth in 1usize..5,
        name in segment(),
        payload in prop::collection::vec(any::<u8>(), 0..64),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("evil.zip");
        let entry_name = format!("{}{name}", "../".repeat(escape_depth));
        {
            let file = std::fs::File::create(&zip_path).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            writer
                .start_file(&entry_name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(&payload).unwrap();
            writer.finish().unwrap();
        }

        let dst = dir.path().join("safe").join("dest");
        let err = extract_zip_file(&zip_path, &dst, 1 << 20).unwrap_err();
        prop_assert_eq!(err.kind(), "ZipSlip");
        prop_assert!(!dst.exists());
    }

    #[test]
    fn wildcard_domains_match_subdomains_only(
        base in "[a-z]{2,8}",
        sub in "[a-z]{1,8}",
        decoy in "[a-z]{1,6}",
    ) {
        let host = format!("{base}.example.com");
        let allowed = vec![format!("*.{host}")];
        prop_assert!(validate_domain(&host, 443, &allowed));
        prop_assert!(validate_domain(&format!("{sub}.{host}"), 443, &allowed));
        // name-prefix lookalikes are rejected
        prop_assert!(!validate_domain(&format!("{decoy}{host}"), 443, &allowed));
    }
}
