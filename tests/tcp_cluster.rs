use pregel_cluster::{AggValue, Algorithm, Config, Mode, Role, RunReport, StopReason, TerminationDecision};

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::net::TcpListener;
use std::thread;

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[test]
fn components_over_tcp() {
    let dir = tempfile::tempdir().unwrap();
    let edges_path = dir.path().join("edges.tsv");
    let mut edges = fs::File::create(&edges_path).unwrap();
    writeln!(edges, "# undirected edges").unwrap();
    for (a, b) in [(1, 2), (2, 3), (4, 5)] {
        writeln!(edges, "{}\t{}", a, b).unwrap();
        writeln!(edges, "{}\t{}", b, a).unwrap();
    }
    drop(edges);

    let mut config = Config::default();
    config.master.address = format!("127.0.0.1:{}", free_port());
    config.master.workers = 2;
    config.master.registration_timeout_ms = 10_000;
    config.master.superstep_timeout_ms = 10_000;
    config.master.poll_interval_ms = 10;
    config.worker.io_timeout_ms = 5_000;
    config.worker.idle_timeout_ms = 20_000;
    config.worker.retry.initial_backoff_ms = 10;
    config.worker.retry.max_backoff_ms = 100;
    config.worker.retry.max_attempts = 50;
    config.job.algorithm = Algorithm::ConnectedComponents;
    config.job.edges_path = Some(edges_path);
    config.job.output_dir = Some(dir.path().join("out"));

    let master = {
        let config = config.clone();
        thread::spawn(move || pregel_cluster::launch_with(config, Role::Master, Mode::Cluster))
    };
    let workers: Vec<_> = (0..2)
        .map(|i| {
            let mut config = config.clone();
            config.worker.name = format!("tcp-{}", i);
            config.worker.partition_hint = Some(i);
            thread::spawn(move || pregel_cluster::launch_with(config, Role::Worker, Mode::Cluster))
        })
        .collect();

    match master.join().unwrap().unwrap() {
        RunReport::Master(outcome) => {
            assert_eq!(outcome.decision, TerminationDecision::HaltConverged);
            assert_eq!(outcome.history[0].total_vertices, 5);
            assert_eq!(outcome.history[0].total_edges, 6);
            assert_eq!(outcome.summary.aggregates.get("components"), Some(&AggValue::Count(2)));
        }
        other => panic!("expected a master report, got {:?}", other),
    }
    for worker in workers {
        match worker.join().unwrap().unwrap() {
            RunReport::Worker(summary) => assert_eq!(summary.reason, StopReason::Converged),
            other => panic!("expected a worker report, got {:?}", other),
        }
    }

    let mut labels = BTreeMap::new();
    for part in 0..2 {
        let text = fs::read_to_string(dir.path().join("out").join(format!("part-{}.txt", part))).unwrap();
        for line in text.lines() {
            let (vertex, label) = line.split_once('\t').unwrap();
            labels.insert(vertex.parse::<i64>().unwrap(), label.parse::<i64>().unwrap());
        }
    }
    let expected: BTreeMap<i64, i64> = [(1, 1), (2, 1), (3, 1), (4, 4), (5, 4)].into_iter().collect();
    assert_eq!(labels, expected);
}
