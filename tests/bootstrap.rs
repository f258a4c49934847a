use pregel_cluster::{launch, Error, RunReport};

use std::fs;
use std::thread;

#[test]
fn illegal_role_exits_with_usage_status() {
    let err = launch("does-not-matter.json", "worker111", "local").unwrap_err();
    assert!(matches!(err, Error::IllegalArgument(_)));
    assert_eq!(err.exit_code(), 2);

    let err = launch("does-not-matter.json", "master", "remote").unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn malformed_config_exits_with_usage_status() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    fs::write(&path, "{ \"master\": { \"workers\": ").unwrap();

    let err = launch(&path, "master", "local").unwrap_err();
    assert!(matches!(err, Error::Json(_)));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn launches_both_roles_from_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let edges = dir.path().join("edges.tsv");
    fs::write(&edges, "0 1\n1 2\n2 0\n").unwrap();

    let config = serde_json::json!({
        "master": {
            "address": "bootstrap-master",
            "workers": 1,
            "registration_timeout_ms": 5000,
            "superstep_timeout_ms": 5000,
            "poll_interval_ms": 10
        },
        "worker": {
            "name": "solo",
            "data_address": "bootstrap-worker:0",
            "retry": { "initial_backoff_ms": 5, "max_backoff_ms": 50, "max_attempts": 40 }
        },
        "job": {
            "algorithm": { "name": "page_rank", "iterations": 5 },
            "edges_path": edges,
            "output_dir": dir.path().join("ranks")
        }
    });
    let path = dir.path().join("job.json");
    fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

    let master = {
        let path = path.clone();
        thread::spawn(move || launch(&path, "master", "local"))
    };
    let worker = launch(&path, "worker", "local").unwrap();

    match worker {
        RunReport::Worker(summary) => {
            assert!(summary.reason.is_success());
            assert_eq!(summary.vertices, 3);
        }
        other => panic!("expected a worker report, got {:?}", other),
    }
    match master.join().unwrap().unwrap() {
        RunReport::Master(outcome) => assert!(outcome.supersteps <= 6),
        other => panic!("expected a master report, got {:?}", other),
    }

    let ranks = fs::read_to_string(dir.path().join("ranks").join("part-0.txt")).unwrap();
    assert_eq!(ranks.lines().count(), 3);
    for line in ranks.lines() {
        let rank: f64 = line.split('\t').nth(1).unwrap().parse().unwrap();
        assert!((rank - 1.0).abs() < 1e-9);
    }
}
