// Tests for crawl state and resume record persistence

use axescope_core::{
    AxeConfig, CheckpointStore, CoreError, CrawlCheckpoint, Decision, FrontierController,
    PendingFetch, ResumeRecord, normalize,
};
use std::fs;
use std::thread;
use tempfile::TempDir;

fn config(dir: &TempDir) -> AxeConfig {
    AxeConfig {
        domains: vec!["x.com".to_string()],
        output_dir: dir.path().to_path_buf(),
        run_id: "nightly".to_string(),
        ..AxeConfig::default()
    }
}

fn crawled(config: &AxeConfig) -> CrawlCheckpoint {
    let mut frontier = FrontierController::new(config);
    for url in ["https://x.com/", "https://x.com/p/1", "https://x.com/p/2", "https://x.com/about"] {
        frontier.offer("x.com", url);
    }
    CrawlCheckpoint {
        state: frontier.into_state(),
        pending: vec![PendingFetch {
            domain: "x.com".to_string(),
            url: normalize("https://x.com/about", None).unwrap(),
            depth: 1,
        }],
    }
}

// ============================================================================
// Crawl State
// ============================================================================

#[test]
fn test_crawl_state_round_trip() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let store = CheckpointStore::from_config(&config);
    let checkpoint = crawled(&config);

    store.save_crawl(&checkpoint).unwrap();
    let loaded = store.load_crawl().unwrap().unwrap();

    assert_eq!(loaded, checkpoint);
    assert_eq!(store.load_crawl_state().unwrap().unwrap(), checkpoint.state);
}

#[test]
fn test_crawl_state_file_layout() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let store = CheckpointStore::from_config(&config);
    store.save_crawl(&crawled(&config)).unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("crawl_state.json")).unwrap())
            .unwrap();

    assert_eq!(raw["schema_version"], 1);
    assert_eq!(raw["templates"]["x.com:/p/{var}"]["sample_count"], 2);
    assert_eq!(
        raw["templates"]["x.com:/p/{var}"]["representative_url"],
        "https://x.com/p/1"
    );
    assert_eq!(raw["templates"]["x.com:/p/{var}"]["domain"], "x.com");
    assert_eq!(raw["visited_urls"].as_array().unwrap().len(), 4);
    assert_eq!(raw["unique_pages"][0], "https://x.com/");
    assert_eq!(raw["per_domain_counts"]["x.com"], 4);
}

#[test]
fn test_saves_are_deterministic() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let store = CheckpointStore::from_config(&config);
    let checkpoint = crawled(&config);

    store.save_crawl(&checkpoint).unwrap();
    let first = fs::read(store.crawl_state_path()).unwrap();
    store.save_crawl(&checkpoint).unwrap();
    let second = fs::read(store.crawl_state_path()).unwrap();

    assert_eq!(first, second);
}

#[test]
fn test_garbage_file_is_corruption() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    fs::write(config.crawl_state_path(), "{ not json").unwrap();

    let err = CheckpointStore::from_config(&config).load_crawl().unwrap_err();
    assert!(matches!(err, CoreError::StateCorruption { .. }));
    assert!(err.is_fatal());
}

#[test]
fn test_broken_invariant_is_corruption() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    fs::write(
        config.crawl_state_path(),
        r#"{"schema_version": 1, "templates": {}, "visited_urls": [],
            "unique_pages": ["https://x.com/"], "per_domain_counts": {}}"#,
    )
    .unwrap();

    let err = CheckpointStore::from_config(&config).load_crawl().unwrap_err();
    assert!(err.to_string().contains("not marked visited"));
}

#[test]
fn test_corrupt_state_discarded_on_request() {
    let dir = TempDir::new().unwrap();
    let config = AxeConfig {
        discard_corrupt_state: true,
        ..config(&dir)
    };
    fs::write(config.crawl_state_path(), "\u{0}\u{0}").unwrap();

    let loaded = CheckpointStore::from_config(&config).load_crawl().unwrap();
    assert!(loaded.is_none());
}

#[test]
fn test_missing_schema_version_is_corruption() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    fs::write(
        config.crawl_state_path(),
        r#"{"templates": {}, "visited_urls": [], "unique_pages": [], "per_domain_counts": {}}"#,
    )
    .unwrap();

    let err = CheckpointStore::from_config(&config).load_crawl().unwrap_err();
    assert!(err.to_string().contains("missing schema_version"));
}

#[test]
fn test_lowered_cap_still_loads() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let checkpoint = crawled(&config);
    CheckpointStore::from_config(&config).save_crawl(&checkpoint).unwrap();

    // four pages were accepted under the default cap
    let lowered = AxeConfig {
        max_urls_per_domain: 2,
        ..config
    };
    let loaded = CheckpointStore::from_config(&lowered).load_crawl().unwrap().unwrap();
    assert_eq!(loaded, checkpoint);

    let mut frontier = FrontierController::with_state(&lowered, loaded.state);
    assert_eq!(frontier.offer("x.com", "https://x.com/new"), Decision::DomainCapExceeded);
}

#[test]
fn test_concurrent_store_saves_stay_loadable() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let store = CheckpointStore::from_config(&config);
    let small = crawled(&config);
    let mut large = small.clone();
    for i in 0..200 {
        large.pending.push(PendingFetch {
            domain: "x.com".to_string(),
            url: normalize(&format!("https://x.com/queued/{}", i), None).unwrap(),
            depth: 2,
        });
    }
    store.save_crawl(&small).unwrap();

    let writers: Vec<_> = [small.clone(), large.clone(), small.clone(), large.clone()]
        .into_iter()
        .map(|checkpoint| {
            let store = store.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    store.save_crawl(&checkpoint).unwrap();
                }
            })
        })
        .collect();

    for _ in 0..100 {
        let loaded = store.load_crawl().unwrap().unwrap();
        assert!(loaded == small || loaded == large);
    }
    for writer in writers {
        writer.join().unwrap();
    }

    // no temporary files are left next to the checkpoint
    let names: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(names, vec!["crawl_state.json"]);
}

// ============================================================================
// Resume Record
// ============================================================================

#[test]
fn test_resume_record_keyed_by_run_id() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let store = CheckpointStore::from_config(&config);

    let mut record = ResumeRecord::default();
    record.mark(normalize("https://x.com/", None).unwrap());
    store.save_resume(&record).unwrap();

    assert!(dir.path().join("resume_nightly.json").exists());
    assert_eq!(store.load_resume().unwrap().unwrap(), record);

    let other = CheckpointStore::from_config(&AxeConfig {
        run_id: "weekly".to_string(),
        ..config
    });
    assert!(other.load_resume().unwrap().is_none());
}

#[test]
fn test_resume_record_layout() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let mut record = ResumeRecord::default();
    record.mark(normalize("https://x.com/b", None).unwrap());
    record.mark(normalize("https://x.com/a", None).unwrap());
    CheckpointStore::from_config(&config).save_resume(&record).unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(config.resume_path()).unwrap()).unwrap();
    assert_eq!(raw["schema_version"], 1);
    assert_eq!(
        raw["visited_scan_urls"],
        serde_json::json!(["https://x.com/a", "https://x.com/b"])
    );
}
