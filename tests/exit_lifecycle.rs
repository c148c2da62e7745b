//! Backing file lifecycle: explicit close, drop and exit hooks

use solid_archive::{
    process_hooks, Archive, ArchiveBuilder, ArchiveConfig, ArchiveError, ExitHooks, HookRegistry,
};
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

/// Set in a re-executed copy of this test binary to the temp dir it leaks into
const LEAK_DIR_VAR: &str = "SOLID_ARCHIVE_LEAK_DIR";

fn config_in(dir: &Path) -> ArchiveConfig {
    ArchiveConfig {
        temp_dir: Some(dir.to_path_buf()),
        temp_prefix: "lifecycle".to_string(),
        ..Default::default()
    }
}

fn files_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

#[test]
fn test_backing_file_lives_in_temp_dir() {
    let dir = tempfile::tempdir().unwrap();
    let hooks = Arc::new(HookRegistry::new());

    let archive = Archive::create(&config_in(dir.path()), hooks.clone()).unwrap();
    let path = archive.path().unwrap();
    assert_eq!(path.parent().unwrap(), dir.path());
    assert!(path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("lifecycle"));
    assert_eq!(files_in(dir.path()), 1);

    archive.close().unwrap();
    assert_eq!(files_in(dir.path()), 0);
}

#[test]
fn test_close_then_exit_hook_is_harmless() {
    let dir = tempfile::tempdir().unwrap();
    let hooks = Arc::new(HookRegistry::new());

    let archive = Archive::create(&config_in(dir.path()), hooks.clone()).unwrap();
    archive.close().unwrap();
    hooks.run();
    archive.close().unwrap();
    assert_eq!(files_in(dir.path()), 0);
}

#[test]
fn test_exit_hook_cleans_many_archives() {
    let dir = tempfile::tempdir().unwrap();
    let hooks = Arc::new(HookRegistry::new());

    let archives: Vec<_> = (0..5)
        .map(|_| Archive::create(&config_in(dir.path()), hooks.clone()).unwrap())
        .collect();
    assert_eq!(files_in(dir.path()), 5);
    assert_eq!(hooks.len(), 5);

    archives[2].close().unwrap();
    assert_eq!(hooks.len(), 4);

    hooks.run();
    assert_eq!(files_in(dir.path()), 0);
    assert!(archives.iter().all(Archive::is_closed));

    for archive in &archives {
        archive.close().unwrap();
        assert!(matches!(archive.read("x"), Err(ArchiveError::EntryNotFound { .. })));
        assert!(matches!(archive.data_len(), Err(ArchiveError::Closed)));
    }
}

#[test]
fn test_close_races_with_exit_hook() {
    let dir = tempfile::tempdir().unwrap();

    for _ in 0..20 {
        let hooks = Arc::new(HookRegistry::new());
        let archive = Archive::create(&config_in(dir.path()), hooks.clone()).unwrap();
        archive.append(b"payload").unwrap();

        let closer = {
            let archive = archive.clone();
            std::thread::spawn(move || archive.close())
        };
        let runner = {
            let hooks = hooks.clone();
            std::thread::spawn(move || hooks.run())
        };

        closer.join().unwrap().unwrap();
        runner.join().unwrap();
        assert!(archive.is_closed());
    }
    assert_eq!(files_in(dir.path()), 0);
}

#[test]
fn test_unfinished_writer_is_discarded_on_drop() {
    let dir = tempfile::tempdir().unwrap();
    let hooks = Arc::new(HookRegistry::new());

    {
        let mut writer = ArchiveBuilder::new()
            .temp_dir(dir.path())
            .exit_hooks(hooks.clone())
            .build_writer()
            .unwrap();
        writer.add_bytes("a", &[1u8; 100_000]).unwrap();
        assert_eq!(files_in(dir.path()), 1);
    }

    assert_eq!(files_in(dir.path()), 0);
    assert!(hooks.is_empty());
}

#[test]
fn test_process_registry_tracks_default_archives() {
    let hooks = process_hooks();
    let archive = Archive::create(&ArchiveConfig::default(), hooks.clone()).unwrap();
    let path = archive.path().unwrap();
    assert!(path.exists());

    drop(archive);
    assert!(!path.exists());
    assert!(!hooks.is_running());
}

#[test]
fn test_leaked_archive_removed_at_process_exit() {
    if let Some(dir) = std::env::var_os(LEAK_DIR_VAR) {
        let dir = Path::new(&dir);
        tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_writer(std::io::stderr)
            .init();

        let archive = Archive::create(&config_in(dir), process_hooks()).unwrap();
        archive.append(b"never closed").unwrap();
        assert_eq!(files_in(dir), 1);

        std::mem::forget(archive);
        std::process::exit(0);
    }

    let dir = tempfile::tempdir().unwrap();
    let output = Command::new(std::env::current_exe().unwrap())
        .args([
            "test_leaked_archive_removed_at_process_exit",
            "--exact",
            "--nocapture",
            "--test-threads=1",
        ])
        .env(LEAK_DIR_VAR, dir.path())
        .output()
        .unwrap();

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "child exited with {}: {}", output.status, stderr);
    assert!(!stderr.contains("panicked"), "child panicked: {}", stderr);
    assert_eq!(files_in(dir.path()), 0);
}
