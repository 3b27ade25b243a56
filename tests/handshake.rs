use std::path::Path;
use std::thread;
use std::time::Duration;

use shmseg::{
    derive_key, run_client, run_observer, run_server, Config, Owner, SegmentRecord, SemaphoreSet,
};

fn scratch_config(name: &str) -> Config {
    let dir = std::env::temp_dir();
    let tag = format!("{}-{}", std::process::id(), name);
    Config {
        mem_path: dir.join(format!("shmseg-it-m-{}", tag)),
        sem_path: dir.join(format!("shmseg-it-s-{}", tag)),
        ..Config::default()
    }
}

fn remove_anchors(cfg: &Config) {
    std::fs::remove_file(&cfg.mem_path).unwrap();
    std::fs::remove_file(&cfg.sem_path).unwrap();
}

/// Blocks until the owner has created the semaphore set, which happens after
/// the region.
fn wait_for_owner(sem_path: &Path) {
    let key = derive_key(sem_path).unwrap();
    while SemaphoreSet::open(key, 1).is_err() {
        thread::sleep(Duration::from_millis(5));
    }
}

fn batch() -> Vec<SegmentRecord> {
    vec![
        "m 10 0x000004d2 --rw-r--r-- alice staff 100 200 10:11:12 no-entry 10:00:00"
            .parse()
            .unwrap(),
        "m 20 0x000004d3 --rwxrwx-w- bob wheel 300 0 no-entry no-entry 11:00:00"
            .parse()
            .unwrap(),
    ]
}

#[test]
fn server_answers_one_batch() {
    let cfg = scratch_config("basic");

    let server = {
        let cfg = cfg.clone();
        thread::spawn(move || run_server(&cfg).unwrap())
    };
    wait_for_owner(&cfg.sem_path);

    let report = run_client(&cfg, &batch()).unwrap();
    let served = server.join().unwrap();

    assert_eq!(report.segments, batch());
    assert_eq!(report.summaries, served);
    assert_eq!(report.summaries.len(), 2);

    let ids: Vec<i32> = report.summaries.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![10, 20]);
    assert_eq!(report.summaries[0].owner.as_str(), "alice");
    assert_eq!(report.summaries[1].owner.as_str(), "bob");
    assert_eq!(report.summaries[0].owner_access_mode.to_string(), "r--");
    assert_eq!(report.summaries[1].owner_access_mode.to_string(), "-w-");

    // The server owned the objects and removed them.
    assert!(shmseg::Resources::open(&cfg).is_err());
    remove_anchors(&cfg);
}

#[test]
fn empty_batch_round_trips() {
    let cfg = scratch_config("empty");

    let server = {
        let cfg = cfg.clone();
        thread::spawn(move || run_server(&cfg).unwrap())
    };
    wait_for_owner(&cfg.sem_path);

    let report = run_client(&cfg, &Vec::<SegmentRecord>::new()).unwrap();
    assert!(report.summaries.is_empty());
    assert!(server.join().unwrap().is_empty());
    remove_anchors(&cfg);
}

#[test]
fn observer_sees_the_same_summaries() {
    let cfg = Config {
        observers: 1,
        ..scratch_config("observer")
    };

    let server = {
        let cfg = cfg.clone();
        thread::spawn(move || run_server(&cfg).unwrap())
    };
    wait_for_owner(&cfg.sem_path);

    let observer = {
        let cfg = cfg.clone();
        thread::spawn(move || run_observer(&cfg).unwrap())
    };
    let report = run_client(&cfg, &batch()).unwrap();

    assert_eq!(observer.join().unwrap(), report.summaries);
    assert_eq!(server.join().unwrap(), report.summaries);
    remove_anchors(&cfg);
}

#[test]
fn client_can_be_the_owner() {
    let cfg = Config {
        owner: Owner::Client,
        ..scratch_config("client-owner")
    };

    let client = {
        let cfg = cfg.clone();
        thread::spawn(move || run_client(&cfg, &batch()).unwrap())
    };
    wait_for_owner(&cfg.sem_path);

    let served = run_server(&cfg).unwrap();
    let report = client.join().unwrap();
    assert_eq!(report.summaries, served);
    assert!(shmseg::Resources::open(&cfg).is_err());
    remove_anchors(&cfg);
}

#[test]
fn oversized_batch_is_rejected() {
    let cfg = Config {
        region_size: 64,
        ..scratch_config("overflow")
    };

    let server = {
        let cfg = cfg.clone();
        thread::spawn(move || run_server(&cfg))
    };
    wait_for_owner(&cfg.sem_path);

    let err = run_client(&cfg, &batch()).unwrap_err();
    assert_eq!(err.category(), shmseg::error::Category::BufferOverflow);

    // Unblock the server with an empty vector so it can shut down.
    let res = shmseg::Resources::open(&cfg).unwrap();
    let mut mem = res.region().attach().unwrap();
    shmseg::write_vector::<SegmentRecord>(&mut mem, 0, &[]).unwrap();
    res.sem().adjust(0, 1).unwrap();
    res.sem().adjust(0, -2).unwrap();
    drop(mem);
    drop(res);

    assert!(server.join().unwrap().unwrap().is_empty());
    remove_anchors(&cfg);
}
