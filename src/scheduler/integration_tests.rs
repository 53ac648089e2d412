// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! End-to-end scheduling tests over stub executors.

use std::sync::Arc;

use crate::backends::stub::{FailingExecutor, FlakyExecutor, StubExecutor, StubOutcome};
use crate::channel::{Subscription, Value};
use crate::config::{ExecutorKind, RunConfig};
use crate::definition::{
    CommandTemplate, Directives, InputPort, OutputPort, PortKind, ProcessDefinition,
};
use crate::errors::ErrorStrategy;
use crate::graph::GraphBuilder;
use crate::scheduler::{RunStatus, Session};
use crate::task::TaskState;
use crate::traits::{Executor, ExecutorSet};

fn test_config(root: &std::path::Path) -> RunConfig {
    RunConfig {
        work_root: root.join("work"),
        cache_root: root.join("cache"),
        resume: true,
        ..RunConfig::default()
    }
}

fn executor_set(executor: Arc<dyn Executor>) -> ExecutorSet {
    let mut set = ExecutorSet::new();
    set.insert(ExecutorKind::Local, executor);
    set
}

fn process(name: &str, directives: Directives) -> ProcessDefinition {
    ProcessDefinition::new(name, CommandTemplate::template("run {x}"))
        .with_input(InputPort::new("x", PortKind::Value))
        .with_output(OutputPort::new("y", PortKind::Value))
        .with_directives(directives)
}

/// Stub backend computing `x * 2` from the task environment.
fn doubling_stub() -> StubExecutor {
    StubExecutor::with_handler(|spec| {
        let x: i64 = spec
            .env_lookup("x")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        StubOutcome::success(format!("{}", x * 2))
    })
}

async fn drain(sub: &mut Subscription) -> Vec<Value> {
    let mut values = Vec::new();
    while let Some(value) = sub.next().await {
        values.push(value);
    }
    values
}

/// The `double` scenario: [1,2,3] through one process must dispatch three
/// tasks and publish [2,4,6] in input order; a second run against the same
/// cache must dispatch zero tasks and republish identical outputs.
#[tokio::test]
async fn double_pipeline_dispatches_once_then_replays_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let mut first_outputs = Vec::new();

    for run in 0..2 {
        let mut builder = GraphBuilder::new();
        builder.queue_channel("nums").queue_channel("doubled");
        builder.source(
            "nums",
            vec![Value::Int(1), Value::Int(2), Value::Int(3)],
        );
        builder.register_process(
            process("double", Directives::default()),
            vec![("x", "nums")],
            vec![("y", "doubled")],
        );
        let graph = builder.build().unwrap();
        let mut sub = graph.channel("doubled").unwrap().subscribe();

        let stub = Arc::new(doubling_stub());
        let session = Session::new(
            graph,
            test_config(dir.path()),
            executor_set(stub.clone()),
        )
        .unwrap();
        let report = session.run().await.unwrap();
        let outputs = drain(&mut sub).await;

        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(
            outputs,
            vec![Value::Int(2), Value::Int(4), Value::Int(6)]
        );

        if run == 0 {
            assert_eq!(stub.submission_count(), 3);
            assert_eq!(report.cache_hits, 0);
            first_outputs = outputs;
        } else {
            assert_eq!(stub.submission_count(), 0);
            assert_eq!(report.cache_hits, 3);
            assert_eq!(outputs, first_outputs);
        }
    }
}

/// Two ports fed [1,2] and [10,20] pair positionally: (1,10) and (2,20),
/// never (1,20).
#[tokio::test]
async fn zip_pairing_is_positional() {
    let dir = tempfile::tempdir().unwrap();
    let mut builder = GraphBuilder::new();
    builder
        .queue_channel("lhs")
        .queue_channel("rhs")
        .queue_channel("sums");
    builder.source("lhs", vec![Value::Int(1), Value::Int(2)]);
    builder.source("rhs", vec![Value::Int(10), Value::Int(20)]);

    let sum = ProcessDefinition::new("sum", CommandTemplate::template("add {a} {b}"))
        .with_input(InputPort::new("a", PortKind::Value))
        .with_input(InputPort::new("b", PortKind::Value))
        .with_output(OutputPort::new("y", PortKind::Value));
    builder.register_process(sum, vec![("a", "lhs"), ("b", "rhs")], vec![("y", "sums")]);

    let graph = builder.build().unwrap();
    let mut sub = graph.channel("sums").unwrap().subscribe();

    let stub = Arc::new(StubExecutor::with_handler(|spec| {
        let a: i64 = spec.env_lookup("a").unwrap().parse().unwrap();
        let b: i64 = spec.env_lookup("b").unwrap().parse().unwrap();
        StubOutcome::success(format!("{}", a + b))
    }));
    let session = Session::new(graph, test_config(dir.path()), executor_set(stub.clone()))
        .unwrap();
    let report = session.run().await.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(stub.submission_count(), 2);
    assert_eq!(drain(&mut sub).await, vec![Value::Int(11), Value::Int(22)]);
}

/// A `retry`-configured process whose task always fails walks through
/// exactly K submitted/running/failed cycles and then aborts the run.
#[tokio::test]
async fn retry_bound_forces_abort_after_k_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let directives = Directives {
        error_strategy: Some(ErrorStrategy::Retry),
        max_retries: Some(3),
        ..Directives::default()
    };

    let mut builder = GraphBuilder::new();
    builder.queue_channel("in").queue_channel("out");
    builder.source("in", vec![Value::Int(1)]);
    builder.register_process(
        process("always_fails", directives),
        vec![("x", "in")],
        vec![("y", "out")],
    );
    let graph = builder.build().unwrap();

    let failing = Arc::new(FailingExecutor::new(1));
    let session = Session::new(
        graph,
        test_config(dir.path()),
        executor_set(failing.clone()),
    )
    .unwrap();
    let events = session.events();
    let report = session.run().await.unwrap();

    assert_eq!(report.status, RunStatus::Aborted);
    assert_ne!(report.exit_code(), 0);
    assert_eq!(failing.submission_count(), 3);
    assert_eq!(events.count("always_fails", TaskState::Submitted), 3);
    assert_eq!(events.count("always_fails", TaskState::Running), 3);
    assert_eq!(events.count("always_fails", TaskState::Failed), 3);
    assert_eq!(events.count("always_fails", TaskState::Retrying), 2);
    assert_eq!(events.count("always_fails", TaskState::Aborted), 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].process, "always_fails");
}

/// A flaky task that recovers within the retry bound completes the run
/// successfully.
#[tokio::test]
async fn retry_recovers_from_transient_failures() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.cache_enabled = false;

    let directives = Directives {
        error_strategy: Some(ErrorStrategy::Retry),
        max_retries: Some(3),
        ..Directives::default()
    };
    let mut builder = GraphBuilder::new();
    builder.queue_channel("in").queue_channel("out");
    builder.source("in", vec![Value::Int(7)]);
    builder.register_process(
        process("transient", directives),
        vec![("x", "in")],
        vec![("y", "out")],
    );
    let graph = builder.build().unwrap();
    let mut sub = graph.channel("out").unwrap().subscribe();

    let flaky = Arc::new(FlakyExecutor::new(2));
    let session = Session::new(graph, config, executor_set(flaky.clone())).unwrap();
    let events = session.events();
    let report = session.run().await.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(flaky.submission_count(), 3);
    assert_eq!(events.count("transient", TaskState::Retrying), 2);
    assert_eq!(events.count("transient", TaskState::Completed), 1);
    assert_eq!(drain(&mut sub).await, vec![Value::Str("run 7".into())]);
}

/// `ignore` failures still publish a tuple of the declared arity so
/// consumers stay aligned, and the run exits zero.
#[tokio::test]
async fn ignore_strategy_publishes_null_tuple_and_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    let directives = Directives {
        error_strategy: Some(ErrorStrategy::Ignore),
        ..Directives::default()
    };

    let mut builder = GraphBuilder::new();
    builder.queue_channel("in").queue_channel("out");
    builder.source("in", vec![Value::Int(1), Value::Int(2)]);
    builder.register_process(
        process("flaky_step", directives),
        vec![("x", "in")],
        vec![("y", "out")],
    );
    let graph = builder.build().unwrap();
    let mut sub = graph.channel("out").unwrap().subscribe();

    let session = Session::new(
        graph,
        test_config(dir.path()),
        executor_set(Arc::new(FailingExecutor::new(1))),
    )
    .unwrap();
    let events = session.events();
    let report = session.run().await.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.exit_code(), 0);
    assert!(report.failures.is_empty());
    assert_eq!(drain(&mut sub).await, vec![Value::Null, Value::Null]);
    // The failures stay visible in the event stream.
    assert_eq!(events.count("flaky_step", TaskState::Failed), 2);
}

/// On `terminate`, every other in-flight task receives a kill and no
/// further candidates are dispatched.
#[tokio::test]
async fn terminate_kills_in_flight_and_stops_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.executor_slots.insert(ExecutorKind::Local, 3);
    // Terminate is the default strategy; keep results out of the cache so
    // the counts are not satisfied by resume.
    config.cache_enabled = false;

    let mut builder = GraphBuilder::new();
    builder.queue_channel("in").queue_channel("out");
    builder.source(
        "in",
        vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)],
    );
    builder.register_process(
        process("work", Directives::default()),
        vec![("x", "in")],
        vec![("y", "out")],
    );
    let graph = builder.build().unwrap();

    // Tasks 1 and 2 hang until killed; task 3 fails and trips the cascade;
    // task 4 must never be submitted.
    let stub = Arc::new(StubExecutor::with_handler(|spec| {
        match spec.env_lookup("x") {
            Some("3") => StubOutcome::failure(1, "boom"),
            _ => StubOutcome::Hang,
        }
    }));
    let session = Session::new(graph, config, executor_set(stub.clone())).unwrap();
    let report = session.run().await.unwrap();

    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(stub.submission_count(), 3);
    assert!(stub.kill_count() >= 2);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].stderr_tail.contains("boom"));
}

/// `finish` lets the failure end the run in error without cancelling, and
/// stops scheduling queued candidates.
#[tokio::test]
async fn finish_strategy_drains_and_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.executor_slots.insert(ExecutorKind::Local, 1);
    config.cache_enabled = false;

    let directives = Directives {
        error_strategy: Some(ErrorStrategy::Finish),
        ..Directives::default()
    };
    let mut builder = GraphBuilder::new();
    builder.queue_channel("in").queue_channel("out");
    builder.source("in", vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    builder.register_process(
        process("fragile", directives),
        vec![("x", "in")],
        vec![("y", "out")],
    );
    let graph = builder.build().unwrap();

    let failing = Arc::new(FailingExecutor::new(1));
    let session = Session::new(graph, config, executor_set(failing.clone())).unwrap();
    let report = session.run().await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(failing.submission_count(), 1);
    assert_eq!(report.failures.len(), 1);
}

/// A process whose only input is a value channel runs exactly once.
#[tokio::test]
async fn value_channel_only_process_runs_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut builder = GraphBuilder::new();
    builder.value_channel("params").queue_channel("out");
    builder.bind_value("params", Value::Int(21));
    builder.register_process(
        process("seed", Directives::default()),
        vec![("x", "params")],
        vec![("y", "out")],
    );
    let graph = builder.build().unwrap();
    let mut sub = graph.channel("out").unwrap().subscribe();

    let stub = Arc::new(doubling_stub());
    let session = Session::new(
        graph,
        test_config(dir.path()),
        executor_set(stub.clone()),
    )
    .unwrap();
    let report = session.run().await.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(stub.submission_count(), 1);
    assert_eq!(report.tasks_created, 1);
    assert_eq!(drain(&mut sub).await, vec![Value::Int(42)]);
}

/// A per-task timeout is treated exactly like an executor-reported failure.
#[tokio::test]
async fn timeout_resolves_through_the_error_strategy() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.cache_enabled = false;

    let directives = Directives {
        timeout_seconds: Some(0),
        ..Directives::default()
    };
    let mut builder = GraphBuilder::new();
    builder.queue_channel("in").queue_channel("out");
    builder.source("in", vec![Value::Int(1)]);
    builder.register_process(
        process("stuck", directives),
        vec![("x", "in")],
        vec![("y", "out")],
    );
    let graph = builder.build().unwrap();

    let stub = Arc::new(StubExecutor::with_handler(|_| StubOutcome::Hang));
    let session = Session::new(graph, config, executor_set(stub.clone())).unwrap();
    let report = session.run().await.unwrap();

    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].stderr_tail.contains("timed out"));
    assert!(stub.kill_count() >= 1);
}

/// A process publishing twice onto a value channel is a definition bug and
/// aborts the run.
#[tokio::test]
async fn runtime_double_bind_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.cache_enabled = false;

    let mut builder = GraphBuilder::new();
    builder.queue_channel("in").value_channel("out");
    builder.source("in", vec![Value::Int(1), Value::Int(2)]);
    builder.register_process(
        process("rebinder", Directives::default()),
        vec![("x", "in")],
        vec![("y", "out")],
    );
    let graph = builder.build().unwrap();

    let session = Session::new(
        graph,
        config,
        executor_set(Arc::new(doubling_stub())),
    )
    .unwrap();
    let report = session.run().await.unwrap();

    assert_eq!(report.status, RunStatus::Aborted);
}

/// Operators and processes compose: a filter upstream thins the stream the
/// process sees, preserving order.
#[tokio::test]
async fn operators_feed_processes_through_the_graph() {
    let dir = tempfile::tempdir().unwrap();
    let mut builder = GraphBuilder::new();
    builder
        .queue_channel("raw")
        .queue_channel("evens")
        .queue_channel("out");
    builder.source(
        "raw",
        vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)],
    );
    builder.filter(
        "raw",
        "evens",
        Arc::new(|value: &Value| matches!(value, Value::Int(i) if i % 2 == 0)),
    );
    builder.register_process(
        process("double", Directives::default()),
        vec![("x", "evens")],
        vec![("y", "out")],
    );
    let graph = builder.build().unwrap();
    let mut sub = graph.channel("out").unwrap().subscribe();

    let stub = Arc::new(doubling_stub());
    let session = Session::new(
        graph,
        test_config(dir.path()),
        executor_set(stub.clone()),
    )
    .unwrap();
    let report = session.run().await.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(stub.submission_count(), 2);
    assert_eq!(drain(&mut sub).await, vec![Value::Int(4), Value::Int(8)]);
}
