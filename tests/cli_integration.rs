//! CLI Integration Tests
//!
//! These tests verify that the CLI commands work correctly end-to-end.
//! They run the actual binary, mostly on the in-memory backend, so each
//! invocation starts from an empty store.
//!
//! Run with:
//! ```bash
//! cargo test --test cli_integration
//! ```

use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

/// Run blobdemo in `dir` and return (stdout, stderr, success)
fn run_blobdemo(args: &[&str], dir: &Path) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_blobdemo"))
        .current_dir(dir)
        .env_remove("BLOBDEMO_CONNECTION_STRING")
        .env("HOME", dir)
        .env("XDG_CONFIG_HOME", dir)
        .env("NO_COLOR", "1")
        .args(args)
        .output()
        .expect("Failed to execute blobdemo");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

fn run_memory(args: &[&str], dir: &Path) -> (String, String, bool) {
    let mut full = vec!["--backend", "memory", "--format", "json"];
    full.extend_from_slice(args);
    run_blobdemo(&full, dir)
}

// ============================================================================
// Help and configuration
// ============================================================================

#[test]
fn test_cli_help_lists_subcommands() {
    let dir = tempdir().unwrap();
    let (stdout, _stderr, success) = run_blobdemo(&["--help"], dir.path());
    assert!(success);
    for command in ["demo", "upload", "delete-many", "sas", "write-catalog"] {
        assert!(stdout.contains(command), "help should mention {}", command);
    }
    assert!(stdout.contains("[default: temp]"));
}

#[test]
fn test_cli_missing_connection_string_fails() {
    let dir = tempdir().unwrap();
    let (_stdout, stderr, success) = run_blobdemo(&["list"], dir.path());
    assert!(!success, "azure backend without config should fail");
    assert!(
        stderr.contains("connection string not found"),
        "unexpected stderr: {}",
        stderr
    );
}

// ============================================================================
// Memory backend commands
// ============================================================================

#[test]
fn test_cli_list_empty_container() {
    let dir = tempdir().unwrap();
    let (stdout, _stderr, success) = run_memory(&["list"], dir.path());
    assert!(success, "list should succeed");
    assert!(stdout.contains("\"count\":0"));
}

#[test]
fn test_cli_upload_reports_blob_name() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("fox.jpg"), b"fox").unwrap();
    let (stdout, stderr, success) = run_memory(&["upload", "fox.jpg"], dir.path());
    assert!(success, "upload should succeed: {}", stderr);
    assert!(stdout.contains("\"name\":\"fox.jpg\""));
}

#[test]
fn test_cli_upload_confirmation_on_stdout() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("fox.jpg"), b"fox").unwrap();
    let (stdout, stderr, success) =
        run_blobdemo(&["--backend", "memory", "upload", "fox.jpg"], dir.path());
    assert!(success, "upload should succeed: {}", stderr);
    assert_eq!(stdout.trim(), "Blob 'fox.jpg' was uploaded");
    assert!(!stderr.contains("was uploaded"));
}

#[test]
fn test_cli_upload_missing_file_fails() {
    let dir = tempdir().unwrap();
    let (_stdout, stderr, success) = run_memory(&["upload", "nope.jpg"], dir.path());
    assert!(!success);
    assert!(stderr.contains("Not found"));
}

#[test]
fn test_cli_delete_missing_blob_succeeds() {
    let dir = tempdir().unwrap();
    let (stdout, _stderr, success) = run_memory(&["delete", "ghost.jpg"], dir.path());
    assert!(success, "deleting a missing blob is not an error");
    assert!(stdout.contains("\"deleted\":false"));
}

#[test]
fn test_cli_delete_many_reports_each_blob() {
    let dir = tempdir().unwrap();
    let (stdout, _stderr, success) =
        run_memory(&["delete-many", "a.jpg", "b.jpg"], dir.path());
    assert!(success);
    assert!(stdout.contains("\"name\":\"a.jpg\""));
    assert!(stdout.contains("\"status\":\"not_found\""));
}

#[test]
fn test_cli_invalid_container_rejected() {
    let dir = tempdir().unwrap();
    let (_stdout, stderr, success) = run_memory(&["-c", "Bad_Name", "list"], dir.path());
    assert!(!success);
    assert!(stderr.contains("invalid container name"));
}

#[test]
fn test_cli_invalid_tier_rejected_by_parser() {
    let dir = tempdir().unwrap();
    let (_stdout, stderr, success) = run_memory(&["tier", "a.jpg", "premium"], dir.path());
    assert!(!success);
    assert!(stderr.contains("unknown access tier"));
}

#[test]
fn test_cli_sas_minutes_overflow_fails_cleanly() {
    let dir = tempdir().unwrap();
    let (_stdout, stderr, success) =
        run_memory(&["sas", "a.json", "--minutes", "18446744073709551615"], dir.path());
    assert!(!success);
    assert!(stderr.contains("too large"), "unexpected stderr: {}", stderr);
    assert!(!stderr.contains("panicked"));
}

#[test]
fn test_cli_sas_lifetime_past_calendar_fails_cleanly() {
    let dir = tempdir().unwrap();
    let (_stdout, stderr, success) =
        run_memory(&["sas", "a.json", "--minutes", "1000000000000"], dir.path());
    assert!(!success);
    assert!(stderr.contains("out of range"), "unexpected stderr: {}", stderr);
    assert!(!stderr.contains("panicked"));
}

#[test]
fn test_cli_write_catalog_prints_success_lines() {
    let dir = tempdir().unwrap();
    let (stdout, _stderr, success) = run_memory(&["write-catalog"], dir.path());
    assert!(success);
    assert!(stdout.contains("Categories written successfully"));
    assert!(stdout.contains("Products written successfully"));
}

#[test]
fn test_cli_read_catalog_on_empty_store_reports_failure() {
    let dir = tempdir().unwrap();
    let (stdout, _stderr, success) = run_memory(&["read-catalog"], dir.path());
    assert!(success, "read failures are reported, not fatal");
    assert!(stdout.contains("Failed to read categories"));
}

// ============================================================================
// Demo walkthrough
// ============================================================================

#[test]
fn test_cli_demo_uploads_lists_and_deletes() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("bear.jpg"), vec![0u8; 2048]).unwrap();

    let (stdout, stderr, success) = run_memory(&["demo"], dir.path());
    assert!(success, "demo should succeed: {}", stderr);

    let separator = "-".repeat(40);
    let (before, after) = stdout
        .split_once(separator.as_str())
        .expect("demo prints a separator");
    for i in 0..5 {
        let name = format!("bear{}.jpg", i);
        assert!(before.contains(&name), "{} listed before delete", name);
        assert!(!after.contains(&name), "{} listed after delete", name);
        assert!(dir.path().join(&name).exists(), "local copy {} made", name);
    }
    assert!(before.contains("2.00 KiB"));
    assert!(stdout.contains("Sourdough"));
}

#[test]
fn test_cli_demo_without_source_fails() {
    let dir = tempdir().unwrap();
    let (_stdout, stderr, success) = run_memory(&["demo"], dir.path());
    assert!(!success);
    assert!(stderr.contains("bear.jpg"));
}

// ============================================================================
// Azure backend through a config file
// ============================================================================

#[cfg(feature = "azure")]
#[test]
fn test_cli_list_against_configured_endpoint() {
    const REQUEST_ID: &str = "4d3a1f8e-5c2b-4f6a-9e1d-7b8c9a0b1c2d";
    const DATE: &str = "Wed, 01 May 2024 12:00:00 GMT";

    let mut server = mockito::Server::new();
    server
        .mock("PUT", "/temp")
        .match_query(mockito::Matcher::UrlEncoded(
            "restype".into(),
            "container".into(),
        ))
        .with_status(201)
        .with_header("x-ms-request-id", REQUEST_ID)
        .with_header("date", DATE)
        .create();
    server
        .mock("GET", "/temp")
        .match_query(mockito::Matcher::UrlEncoded("comp".into(), "list".into()))
        .with_status(200)
        .with_header("x-ms-request-id", REQUEST_ID)
        .with_header("date", DATE)
        .with_header("content-type", "application/xml")
        .with_body(format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?><EnumerationResults><Blobs>\
             <Blob><Name>fox.jpg</Name><Properties>\
             <Creation-Time>{date}</Creation-Time><Last-Modified>{date}</Last-Modified>\
             <Etag>0x8DC69D8A2C1B2F3</Etag><Content-Length>1024</Content-Length>\
             <Content-Type>image/jpeg</Content-Type><BlobType>BlockBlob</BlobType>\
             <AccessTier>Cool</AccessTier>\
             </Properties></Blob></Blobs><NextMarker /></EnumerationResults>",
            date = DATE
        ))
        .create();

    let dir = tempdir().unwrap();
    let config = serde_json::json!({
        "ConnectionStrings": {
            "Default": format!(
                "BlobEndpoint={};AccountName=devstoreaccount1;AccountKey=Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==",
                server.url()
            )
        },
        "TimeoutSecs": 5
    });
    std::fs::write(dir.path().join("config.json"), config.to_string()).unwrap();

    let (stdout, stderr, success) = run_blobdemo(&["list"], dir.path());
    assert!(success, "list should succeed: {}", stderr);
    assert!(stdout.starts_with("Name"));
    assert!(stdout.contains("fox.jpg"));
    assert!(stdout.contains("Cool"));
    assert!(stdout.contains("1.00 KiB"));
}
