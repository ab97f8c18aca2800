#[path = "../src/backup.rs"]
mod backup;

use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = temp_dir("portal-backup-src");
    let workspace2 = temp_dir("portal-backup-dst");
    let out_dir = temp_dir("portal-backup-out");

    let bytes = b"sqlite-test-payload";
    std::fs::write(workspace.join("portal.sqlite3"), bytes).expect("write source db");

    let bundle_path = out_dir.join("workspace.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT);
    assert_eq!(export.db_bytes, bytes.len() as u64);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    assert!(manifest.contains(backup::BUNDLE_FORMAT));
    assert!(manifest.contains(&export.db_sha256));
    archive
        .by_name("db/portal.sqlite3")
        .expect("database entry in bundle");

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.db_sha256, export.db_sha256);

    let restored = std::fs::read(workspace2.join("portal.sqlite3")).expect("read restored db");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn tampered_database_entry_is_rejected() {
    let out_dir = temp_dir("portal-backup-tampered");
    let workspace = temp_dir("portal-backup-tampered-dst");
    std::fs::write(workspace.join("portal.sqlite3"), b"keep-me").expect("write existing db");

    let bundle_path = out_dir.join("tampered.zip");
    {
        let f = File::create(&bundle_path).expect("create bundle");
        let mut zip = zip::ZipWriter::new(f);
        let opts = zip::write::FileOptions::default();
        zip.start_file("manifest.json", opts).expect("manifest");
        zip.write_all(
            format!(
                r#"{{"format":"{}","dbSha256":"{}"}}"#,
                backup::BUNDLE_FORMAT,
                "0".repeat(64)
            )
            .as_bytes(),
        )
        .expect("write manifest");
        zip.start_file("db/portal.sqlite3", opts).expect("db entry");
        zip.write_all(b"not-what-the-manifest-says")
            .expect("write db");
        zip.finish().expect("finish");
    }

    let e = backup::import_workspace_bundle(&bundle_path, &workspace)
        .err()
        .expect("digest mismatch");
    assert!(e.to_string().contains("digest mismatch"));
    let kept = std::fs::read(workspace.join("portal.sqlite3")).expect("read db");
    assert_eq!(kept, b"keep-me");

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn unknown_bundle_format_is_rejected() {
    let out_dir = temp_dir("portal-backup-format");
    let workspace = temp_dir("portal-backup-format-dst");
    let bundle_path = out_dir.join("other.zip");
    {
        let f = File::create(&bundle_path).expect("create bundle");
        let mut zip = zip::ZipWriter::new(f);
        zip.start_file("manifest.json", zip::write::FileOptions::default())
            .expect("manifest");
        zip.write_all(br#"{"format":"something-else"}"#)
            .expect("write manifest");
        zip.finish().expect("finish");
    }

    let e = backup::import_workspace_bundle(&bundle_path, &workspace)
        .err()
        .expect("format rejected");
    assert!(e.to_string().contains("unsupported bundle format"));
    assert!(!workspace.join("portal.sqlite3").exists());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}
