//! Mirroring integration tests: round trips, idempotence, reconciliation,
//! deletion and the startup scenarios.

use pwiki_core::{Reconciler, StoreConfig, StoreError, SyncEngine, TriggerPolicy, Wiki};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn config(tmp: &TempDir) -> StoreConfig {
    StoreConfig::new(tmp.path().join("work"), tmp.path().join("persist"))
}

/// Every file under `root`, keyed by relative path.
fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Vec<u8>>) {
        let Ok(entries) = fs::read_dir(dir) else { return };
        for entry in entries {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let rel = path.strip_prefix(root).unwrap().to_path_buf();
                out.insert(rel, fs::read(&path).unwrap());
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

#[tokio::test]
async fn test_round_trip_into_empty_working_store() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp);
    let (wiki, _) = Wiki::open(&config).unwrap();

    wiki.save_page("alpha", b"hello world").unwrap();
    wiki.add_attachment("alpha", "doc.pdf", &[0u8, 159, 146, 150]).unwrap();
    wiki.add_attachment("alpha", "img.png", b"png").unwrap();
    wiki.save_page("beta", b"").unwrap();
    wiki.triggers().scheduler().flush().await.unwrap();
    let before_alpha = wiki.load_page("alpha").unwrap();
    let before_beta = wiki.load_page("beta").unwrap();
    drop(wiki);

    // the working store is lost
    fs::remove_dir_all(&config.working_root).unwrap();

    let (wiki, report) = Wiki::open(&config).unwrap();
    assert_eq!(report.restore.titles, vec!["alpha", "beta"]);

    let alpha = wiki.load_page("alpha").unwrap();
    assert_eq!(alpha.body, before_alpha.body);
    let mut files = alpha.files.clone();
    files.sort();
    assert_eq!(files, vec!["doc.pdf", "img.png"]);
    assert_eq!(
        wiki.read_attachment("alpha", "doc.pdf").unwrap(),
        vec![0u8, 159, 146, 150]
    );
    assert_eq!(wiki.load_page("beta").unwrap(), before_beta);
}

#[test]
fn test_backup_and_restore_are_idempotent() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp);
    config.ensure_dirs().unwrap();
    let engine = SyncEngine::new(&config);

    let w = engine.working();
    fs::write(w.body_path("alpha"), "a").unwrap();
    fs::write(w.body_path("beta"), "b").unwrap();
    fs::create_dir_all(w.attachment_dir("alpha")).unwrap();
    fs::write(w.blob_path("alpha", "x.bin"), [7u8; 64]).unwrap();

    engine.backup().unwrap();
    let persistent_once = snapshot(&config.persistent_root);
    engine.backup().unwrap();
    assert_eq!(snapshot(&config.persistent_root), persistent_once);

    engine.restore().unwrap();
    let working_once = snapshot(&config.working_root);
    engine.restore().unwrap();
    assert_eq!(snapshot(&config.working_root), working_once);
}

#[test]
fn test_reconcile_listing_matches_blobs() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp);
    config.ensure_dirs().unwrap();
    let engine = SyncEngine::new(&config);

    let p = engine.persistent();
    fs::create_dir_all(p.attachment_dir("orphan")).unwrap();
    for name in ["c.txt", "a.png", "b.pdf"] {
        fs::write(p.blob_path("orphan", name), name).unwrap();
    }

    let restored = engine.restore().unwrap();
    assert!(restored.titles.is_empty());
    Reconciler::new(&engine).reconcile(&restored.titles).unwrap();

    let w = engine.working();
    assert_eq!(fs::read(w.body_path("orphan")).unwrap(), b"");
    let listing = fs::read_to_string(w.listing_path("orphan")).unwrap();
    let mut lines: Vec<&str> = listing.lines().collect();
    lines.sort();
    assert_eq!(lines, vec!["a.png", "b.pdf", "c.txt"]);
}

#[tokio::test]
async fn test_delete_removes_page_from_both_stores() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp);
    let (wiki, _) = Wiki::open(&config).unwrap();

    wiki.save_page("doomed", b"bye").unwrap();
    wiki.add_attachment("doomed", "f.txt", b"f").unwrap();
    wiki.triggers().scheduler().flush().await.unwrap();

    let engine = wiki.triggers().engine().clone();
    // a listing left in the persistent store by an older layout
    fs::write(engine.persistent().listing_path("doomed"), "f.txt").unwrap();
    assert!(engine.persistent().body_path("doomed").is_file());

    let ticket = wiki.delete_page("doomed").unwrap();
    wiki.triggers().scheduler().wait_for(ticket).await.unwrap();

    for layout in [engine.working(), engine.persistent()] {
        assert!(!layout.body_path("doomed").exists());
        assert!(!layout.listing_path("doomed").exists());
        assert!(!layout.attachment_dir("doomed").exists());
    }
    assert!(matches!(
        wiki.load_page("doomed"),
        Err(StoreError::NotFound(_))
    ));
}

#[test]
fn test_startup_scenario_alpha() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp);
    let pdf: Vec<u8> = (0..=255u8).collect();
    fs::create_dir_all(config.persistent_root.join("files/alpha")).unwrap();
    fs::write(config.persistent_root.join("alpha.txt"), "hello").unwrap();
    fs::write(config.persistent_root.join("files/alpha/doc.pdf"), &pdf).unwrap();

    let engine = SyncEngine::new(&config);
    TriggerPolicy::startup(&config, &engine).unwrap();

    let work = &config.working_root;
    assert_eq!(fs::read_to_string(work.join("alpha.txt")).unwrap(), "hello");
    assert_eq!(fs::read_to_string(work.join("alpha.files.txt")).unwrap(), "doc.pdf");
    assert_eq!(fs::read(work.join("files/alpha/doc.pdf")).unwrap(), pdf);
}

#[tokio::test]
async fn test_scenario_beta_persistent_copy_removed() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp);
    let (wiki, _) = Wiki::open(&config).unwrap();

    let ticket = wiki.save_page("beta", b"x").unwrap();
    wiki.triggers().scheduler().wait_for(ticket).await.unwrap();

    let engine = wiki.triggers().engine().clone();
    fs::remove_file(engine.persistent().body_path("beta")).unwrap();
    fs::remove_file(engine.working().body_path("beta")).unwrap();

    assert!(matches!(
        engine.restore_one("beta"),
        Err(StoreError::NotFound(t)) if t == "beta"
    ));
    assert!(matches!(
        wiki.load_page("beta"),
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_scenario_gamma_upload_without_body() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp);
    let (wiki, _) = Wiki::open(&config).unwrap();

    wiki.add_attachment("gamma", "img.png", b"\x89PNG").unwrap();

    let work = &config.working_root;
    assert_eq!(fs::read(work.join("gamma.txt")).unwrap(), b"");
    assert_eq!(fs::read_to_string(work.join("gamma.files.txt")).unwrap(), "img.png");
}

#[tokio::test]
async fn test_load_miss_restores_from_persistent() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp);
    let (wiki, _) = Wiki::open(&config).unwrap();

    wiki.save_page("alpha", b"kept").unwrap();
    wiki.add_attachment("alpha", "a.txt", b"a").unwrap();
    wiki.triggers().scheduler().flush().await.unwrap();

    let engine = wiki.triggers().engine().clone();
    fs::remove_file(engine.working().body_path("alpha")).unwrap();
    fs::remove_file(engine.working().listing_path("alpha")).unwrap();
    fs::remove_dir_all(engine.working().attachment_dir("alpha")).unwrap();

    let page = wiki.load_page("alpha").unwrap();
    assert_eq!(page.body, b"kept");
    assert_eq!(page.files, vec!["a.txt"]);
    assert_eq!(wiki.read_attachment("alpha", "a.txt").unwrap(), b"a");
}

#[tokio::test]
async fn test_upload_to_persistent_only_page_keeps_its_body() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp);
    config.ensure_dirs().unwrap();
    fs::write(config.persistent_root.join("old.txt"), "from backup").unwrap();
    let wiki = Wiki::with_engine(Arc::new(SyncEngine::new(&config)));

    wiki.add_attachment("old", "new.png", b"n").unwrap();
    let page = wiki.load_page("old").unwrap();
    assert_eq!(page.body, b"from backup");
    assert_eq!(page.files, vec!["new.png"]);
}

#[tokio::test]
async fn test_removed_attachment_is_not_resurrected_on_restart() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp);
    let (wiki, _) = Wiki::open(&config).unwrap();

    wiki.add_attachment("alpha", "keep.png", b"k").unwrap();
    wiki.add_attachment("alpha", "drop.png", b"d").unwrap();
    wiki.triggers().scheduler().flush().await.unwrap();
    wiki.remove_attachment("alpha", "drop.png").unwrap();
    wiki.triggers().scheduler().flush().await.unwrap();
    drop(wiki);

    fs::remove_dir_all(&config.working_root).unwrap();
    let (wiki, _) = Wiki::open(&config).unwrap();
    assert_eq!(wiki.load_page("alpha").unwrap().files, vec!["keep.png"]);
}

#[test]
fn test_startup_drops_legacy_listing_for_empty_directory() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp);
    let persist = &config.persistent_root;
    fs::create_dir_all(persist.join("files/alpha")).unwrap();
    fs::write(persist.join("alpha.txt"), "hello").unwrap();
    fs::write(persist.join("alpha.files.txt"), "gone.png").unwrap();

    let engine = SyncEngine::new(&config);
    let report = TriggerPolicy::startup(&config, &engine).unwrap();

    assert_eq!(report.reconcile.repaired, vec!["alpha"]);
    assert_eq!(engine.working().read_listing("alpha").unwrap(), None);
    assert!(engine.working().blob_names("alpha").unwrap().is_empty());
}

#[tokio::test]
async fn test_open_drops_listing_without_attachment_directory() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp);
    fs::create_dir_all(&config.working_root).unwrap();
    fs::write(config.working_root.join("beta.txt"), "b").unwrap();
    fs::write(config.working_root.join("beta.files.txt"), "ghost.png\n").unwrap();

    let (wiki, report) = Wiki::open(&config).unwrap();
    assert_eq!(report.reconcile.repaired, vec!["beta"]);
    let page = wiki.load_page("beta").unwrap();
    assert_eq!(page.body, b"b");
    assert!(page.files.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_saves_are_all_mirrored() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp);
    let (wiki, _) = Wiki::open(&config).unwrap();
    let wiki = Arc::new(wiki);

    let mut handles = Vec::new();
    for i in 0..8 {
        let wiki = wiki.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            for round in 0..5 {
                let body = format!("writer {} round {}", i, round);
                wiki.save_page(&format!("page{}", i), body.as_bytes()).unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
    wiki.triggers().scheduler().flush().await.unwrap();

    let persistent = wiki.triggers().engine().persistent();
    for i in 0..8 {
        let body = fs::read_to_string(persistent.body_path(&format!("page{}", i))).unwrap();
        assert_eq!(body, format!("writer {} round 4", i));
    }
}
