// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheEntry, CacheStore};
use crate::channel::{Channel, Value};
use crate::config::{ExecutorKind, RunConfig};
use crate::definition::{extract_output, ProcessDefinition};
use crate::errors::{ErrorStrategy, ExecutionError};
use crate::graph::ProcessNode;
use crate::observability::messages::{CacheHit, StrategyApplied, StructuredLog};
use crate::observability::{EventLog, TaskEvent};
use crate::resolver::ResolverEvent;
use crate::task::{Task, TaskSpec, TaskState};
use crate::traits::{Executor, ExecutorSet, PollStatus, TaskStreams};

use super::session::TaskFailure;

/// What a monitor task reports back to the dispatch loop.
#[derive(Debug)]
pub(crate) enum MonitorMsg {
    Running { task_id: u64 },
    Finished { task_id: u64, outcome: MonitorOutcome },
}

#[derive(Debug)]
pub(crate) enum MonitorOutcome {
    Completed { exit_status: i32, streams: TaskStreams },
    BackendFailed { reason: String },
    TimedOut { seconds: u64 },
    Killed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    /// `finish` strategy engaged: no new dispatch, running tasks complete.
    Draining,
    /// `terminate` engaged (or forced abort): everything cancelled.
    Terminated,
}

/// Per-process scheduling state.
struct ProcessRuntime {
    node: ProcessNode,
    /// Admission FIFO of task ids awaiting dispatch.
    queue: VecDeque<u64>,
    in_flight: usize,
    exhausted: bool,
    /// Candidates seen so far (the next expected emission sequence).
    emitted: u64,
    /// Next emission sequence to publish downstream.
    next_pub: u64,
    /// Completed output tuples buffered for in-order publication.
    ready: BTreeMap<u64, Vec<Value>>,
    outputs_closed: bool,
}

impl ProcessRuntime {
    fn new(node: ProcessNode) -> Self {
        Self {
            node,
            queue: VecDeque::new(),
            in_flight: 0,
            exhausted: false,
            emitted: 0,
            next_pub: 0,
            ready: BTreeMap::new(),
            outputs_closed: false,
        }
    }

    fn settled(&self) -> bool {
        self.exhausted
            && self.queue.is_empty()
            && self.in_flight == 0
            && self.next_pub == self.emitted
    }
}

/// What the dispatcher hands back to the session when the loop ends.
pub(crate) struct DispatchSummary {
    pub failures: Vec<TaskFailure>,
    pub aborted: bool,
    pub tasks_created: u64,
    pub cache_hits: u64,
}

/// The single-owner scheduling loop.
pub(crate) struct Dispatcher {
    config: RunConfig,
    executors: ExecutorSet,
    definitions: Arc<Vec<ProcessDefinition>>,
    channels: HashMap<String, Channel>,
    store: CacheStore,
    events: EventLog,
    cancel: CancellationToken,
    monitor_tx: UnboundedSender<MonitorMsg>,
    semaphores: HashMap<ExecutorKind, Arc<Semaphore>>,
    procs: Vec<ProcessRuntime>,
    tasks: HashMap<u64, Task>,
    next_task_id: u64,
    rr_cursor: usize,
    mode: Mode,
    failures: Vec<TaskFailure>,
    aborted: bool,
    cache_hits: u64,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: RunConfig,
        executors: ExecutorSet,
        definitions: Arc<Vec<ProcessDefinition>>,
        channels: HashMap<String, Channel>,
        processes: Vec<ProcessNode>,
        store: CacheStore,
        events: EventLog,
        cancel: CancellationToken,
        monitor_tx: UnboundedSender<MonitorMsg>,
    ) -> Self {
        let mut semaphores = HashMap::new();
        for kind in executors.kinds() {
            semaphores.insert(kind, Arc::new(Semaphore::new(config.slots_for(kind))));
        }
        Self {
            config,
            executors,
            definitions,
            channels,
            store,
            events,
            cancel,
            monitor_tx,
            semaphores,
            procs: processes.into_iter().map(ProcessRuntime::new).collect(),
            tasks: HashMap::new(),
            next_task_id: 0,
            rr_cursor: 0,
            mode: Mode::Normal,
            failures: Vec::new(),
            aborted: false,
            cache_hits: 0,
        }
    }

    /// Drive the loop until every process settles (normal end) or all
    /// in-flight work has drained after a finish/terminate.
    pub(crate) async fn run(
        mut self,
        mut resolver_rx: UnboundedReceiver<ResolverEvent>,
        mut monitor_rx: UnboundedReceiver<MonitorMsg>,
    ) -> DispatchSummary {
        let mut resolvers_done = self.procs.is_empty();

        loop {
            if self.is_complete(resolvers_done) {
                break;
            }
            tokio::select! {
                maybe_event = resolver_rx.recv(), if !resolvers_done => {
                    match maybe_event {
                        Some(event) => self.handle_resolver(event),
                        None => resolvers_done = true,
                    }
                }
                maybe_msg = monitor_rx.recv() => {
                    if let Some(msg) = maybe_msg {
                        self.handle_monitor(msg);
                    }
                }
            }
        }

        if self.mode != Mode::Normal {
            // Unwind downstream operators waiting on channels that will
            // never receive another value.
            for channel in self.channels.values() {
                channel.close();
            }
        }

        DispatchSummary {
            failures: self.failures,
            aborted: self.aborted,
            tasks_created: self.next_task_id,
            cache_hits: self.cache_hits,
        }
    }

    fn is_complete(&self, resolvers_done: bool) -> bool {
        match self.mode {
            Mode::Normal => resolvers_done && self.procs.iter().all(ProcessRuntime::settled),
            Mode::Draining | Mode::Terminated => self.procs.iter().all(|p| p.in_flight == 0),
        }
    }

    fn handle_resolver(&mut self, event: ResolverEvent) {
        match event {
            ResolverEvent::Candidate {
                process,
                seq,
                inputs,
            } => self.admit_candidate(process, seq, inputs),
            ResolverEvent::Exhausted { process } => {
                self.procs[process].exhausted = true;
                self.maybe_close_outputs(process);
            }
        }
    }

    fn admit_candidate(&mut self, process: usize, seq: u64, inputs: Vec<(String, Value)>) {
        self.procs[process].emitted = seq + 1;
        if self.mode != Mode::Normal {
            // Unscheduled candidates are discarded once a failure policy
            // stopped the run.
            return;
        }

        let definitions = Arc::clone(&self.definitions);
        let def = &definitions[self.procs[process].node.def_index];
        let task_id = self.next_task_id;
        self.next_task_id += 1;
        let task = Task::new(
            task_id,
            self.procs[process].node.def_index,
            def,
            seq,
            inputs,
            &self.config.work_root,
        );
        self.events.record(TaskEvent::now(
            task_id,
            task.process.as_str(),
            TaskState::Pending,
            task.attempt,
            None,
        ));

        let use_cache = self.config.cache_enabled && def.directives.cache;
        if use_cache && self.config.resume {
            if let Some(entry) = self.store.lookup(&task.cache_key) {
                self.cache_hits += 1;
                let key_hex = task.cache_key.to_hex();
                CacheHit {
                    process: task.process.as_str(),
                    task_id,
                    key: key_hex.as_str(),
                }
                .log();
                self.events.record(TaskEvent::now(
                    task_id,
                    task.process.as_str(),
                    TaskState::Completed,
                    task.attempt,
                    Some(entry.exit_status),
                ));
                self.procs[process].ready.insert(seq, entry.outputs);
                self.flush_ready(process);
                self.maybe_close_outputs(process);
                return;
            }
        }

        self.tasks.insert(task_id, task);
        self.procs[process].queue.push_back(task_id);
        self.try_dispatch();
    }

    /// Round-robin over processes, admitting queued tasks while their
    /// executor has capacity. The cursor advances past each dispatched
    /// process, so no process can starve another.
    fn try_dispatch(&mut self) {
        if self.mode != Mode::Normal || self.procs.is_empty() {
            return;
        }
        let n = self.procs.len();
        loop {
            let mut dispatched = false;
            for offset in 0..n {
                let index = (self.rr_cursor + offset) % n;
                if self.procs[index].queue.is_empty() {
                    continue;
                }
                let kind = self.config.executor_for(&self.procs[index].node.name);
                let Some(semaphore) = self.semaphores.get(&kind) else {
                    continue;
                };
                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    continue;
                };
                let task_id = self.procs[index]
                    .queue
                    .pop_front()
                    .expect("non-empty queue");
                self.rr_cursor = (index + 1) % n;
                self.launch(index, task_id, kind, permit);
                dispatched = true;
                break;
            }
            if !dispatched {
                return;
            }
        }
    }

    fn launch(
        &mut self,
        process: usize,
        task_id: u64,
        kind: ExecutorKind,
        permit: OwnedSemaphorePermit,
    ) {
        let Some(executor) = self.executors.get(kind).cloned() else {
            // Session validates executor coverage before the run; reaching
            // here means the registry changed under us.
            tracing::error!(kind = kind.as_str(), "no executor registered, terminating");
            self.terminate();
            return;
        };

        let definitions = Arc::clone(&self.definitions);
        let def = &definitions[self.procs[process].node.def_index];
        let Some(task) = self.tasks.get_mut(&task_id) else {
            return;
        };
        task.advance(TaskState::Submitted);
        let spec = task.to_spec(def);
        self.events.record(TaskEvent::now(
            task_id,
            task.process.as_str(),
            TaskState::Submitted,
            task.attempt,
            None,
        ));
        self.procs[process].in_flight += 1;

        let timeout = self.config.timeout_for(&def.directives);
        tokio::spawn(monitor(
            spec,
            executor,
            permit,
            self.config.poll_interval(),
            timeout,
            self.cancel.clone(),
            self.monitor_tx.clone(),
        ));
    }

    fn handle_monitor(&mut self, msg: MonitorMsg) {
        match msg {
            MonitorMsg::Running { task_id } => {
                if let Some(task) = self.tasks.get_mut(&task_id) {
                    task.advance(TaskState::Running);
                    self.events.record(TaskEvent::now(
                        task_id,
                        task.process.as_str(),
                        TaskState::Running,
                        task.attempt,
                        None,
                    ));
                }
            }
            MonitorMsg::Finished { task_id, outcome } => self.settle(task_id, outcome),
        }
    }

    fn settle(&mut self, task_id: u64, outcome: MonitorOutcome) {
        let Some(process) = self
            .tasks
            .get(&task_id)
            .map(|t| self.process_index(t.def_index))
        else {
            return;
        };
        self.procs[process].in_flight = self.procs[process].in_flight.saturating_sub(1);

        match outcome {
            MonitorOutcome::Completed {
                exit_status,
                streams,
            } => {
                let definitions = Arc::clone(&self.definitions);
                let def = &definitions[self.procs[process].node.def_index];
                if def.directives.accepts_exit(exit_status) {
                    self.complete(process, task_id, exit_status, &streams);
                } else {
                    self.fail(process, task_id, Some(exit_status), streams.stderr);
                }
            }
            MonitorOutcome::BackendFailed { reason } => {
                self.fail(process, task_id, None, reason);
            }
            MonitorOutcome::TimedOut { seconds } => {
                self.fail(
                    process,
                    task_id,
                    None,
                    format!("timed out after {}s", seconds),
                );
            }
            MonitorOutcome::Killed => {
                // Collateral of a terminate cascade, not an independent
                // failure; visible in the event stream only.
                if let Some(task) = self.tasks.get_mut(&task_id) {
                    task.advance(TaskState::Failed);
                    self.events.record(TaskEvent::now(
                        task_id,
                        task.process.as_str(),
                        TaskState::Failed,
                        task.attempt,
                        None,
                    ));
                }
                self.tasks.remove(&task_id);
            }
        }

        self.try_dispatch();
        self.maybe_close_outputs(process);
    }

    fn complete(&mut self, process: usize, task_id: u64, exit_status: i32, streams: &TaskStreams) {
        let definitions = Arc::clone(&self.definitions);
        let def = &definitions[self.procs[process].node.def_index];
        let (work_dir, seq, cache_key) = match self.tasks.get(&task_id) {
            Some(task) => (task.work_dir.clone(), task.seq, task.cache_key),
            None => return,
        };

        let mut outputs = Vec::with_capacity(def.outputs.len());
        let mut extraction_error = None;
        for port in &def.outputs {
            match extract_output(port.kind, &port.name, &streams.stdout, &work_dir) {
                Ok(value) => outputs.push(value),
                Err(e) => {
                    extraction_error = Some(e.to_string());
                    break;
                }
            }
        }
        if let Some(reason) = extraction_error {
            self.fail(process, task_id, Some(exit_status), reason);
            return;
        }

        if let Some(task) = self.tasks.get_mut(&task_id) {
            task.exit_status = Some(exit_status);
            task.advance(TaskState::Completed);
            self.events.record(TaskEvent::now(
                task_id,
                task.process.as_str(),
                TaskState::Completed,
                task.attempt,
                Some(exit_status),
            ));
        }

        if self.config.cache_enabled && def.directives.cache {
            let artifacts = outputs
                .iter()
                .filter_map(|value| match value {
                    Value::Path(path) => Some(path.clone()),
                    _ => None,
                })
                .collect();
            let entry = CacheEntry::new(exit_status, outputs.clone()).with_artifacts(artifacts);
            if let Err(e) = self.store.store(&cache_key, &entry) {
                tracing::warn!(task_id, error = %e, "failed to record cache entry");
            }
        }

        self.tasks.remove(&task_id);
        self.procs[process].ready.insert(seq, outputs);
        self.flush_ready(process);
    }

    fn fail(&mut self, process: usize, task_id: u64, exit_status: Option<i32>, detail: String) {
        let definitions = Arc::clone(&self.definitions);
        let def = &definitions[self.procs[process].node.def_index];
        let strategy = self.config.strategy_for(&def.directives);
        let retries = self.config.retries_for(&def.directives);
        let output_arity = def.outputs.len();

        let (process_name, attempt, seq) = match self.tasks.get_mut(&task_id) {
            Some(task) => {
                task.exit_status = exit_status;
                task.advance(TaskState::Failed);
                (task.process.clone(), task.attempt, task.seq)
            }
            None => return,
        };
        self.events.record(TaskEvent::now(
            task_id,
            process_name.as_str(),
            TaskState::Failed,
            attempt,
            exit_status,
        ));
        let strategy_label = strategy.to_string();
        StrategyApplied {
            process: process_name.as_str(),
            task_id,
            strategy: strategy_label.as_str(),
            attempt,
        }
        .log();

        match strategy {
            ErrorStrategy::Retry if attempt < retries => {
                if let Some(task) = self.tasks.get_mut(&task_id) {
                    task.advance(TaskState::Retrying);
                    task.attempt += 1;
                    task.exit_status = None;
                }
                self.events.record(TaskEvent::now(
                    task_id,
                    process_name.as_str(),
                    TaskState::Retrying,
                    attempt,
                    exit_status,
                ));
                self.procs[process].queue.push_back(task_id);
            }
            ErrorStrategy::Retry => {
                if let Some(task) = self.tasks.get_mut(&task_id) {
                    task.advance(TaskState::Aborted);
                }
                self.events.record(TaskEvent::now(
                    task_id,
                    process_name.as_str(),
                    TaskState::Aborted,
                    attempt,
                    exit_status,
                ));
                self.failures.push(TaskFailure {
                    task_id,
                    process: process_name,
                    exit_status,
                    stderr_tail: tail_lines(&detail, 5),
                });
                self.tasks.remove(&task_id);
                self.terminate();
            }
            ErrorStrategy::Ignore => {
                // Consumers still receive a tuple of the declared arity so
                // downstream pairing stays aligned.
                if let Some(task) = self.tasks.get_mut(&task_id) {
                    task.advance(TaskState::Completed);
                }
                self.events.record(TaskEvent::now(
                    task_id,
                    process_name.as_str(),
                    TaskState::Completed,
                    attempt,
                    exit_status,
                ));
                self.tasks.remove(&task_id);
                self.procs[process]
                    .ready
                    .insert(seq, vec![Value::Null; output_arity]);
                self.flush_ready(process);
            }
            ErrorStrategy::Finish => {
                self.failures.push(TaskFailure {
                    task_id,
                    process: process_name,
                    exit_status,
                    stderr_tail: tail_lines(&detail, 5),
                });
                self.tasks.remove(&task_id);
                if self.mode == Mode::Normal {
                    self.mode = Mode::Draining;
                    self.discard_queued();
                }
            }
            ErrorStrategy::Terminate => {
                self.failures.push(TaskFailure {
                    task_id,
                    process: process_name,
                    exit_status,
                    stderr_tail: tail_lines(&detail, 5),
                });
                self.tasks.remove(&task_id);
                self.terminate();
            }
        }
    }

    /// Cancel everything: kill in-flight work through the cancellation
    /// token, discard unscheduled candidates, end the run in error.
    fn terminate(&mut self) {
        self.aborted = true;
        if self.mode == Mode::Terminated {
            return;
        }
        self.mode = Mode::Terminated;
        self.cancel.cancel();
        self.discard_queued();
    }

    fn discard_queued(&mut self) {
        for process in 0..self.procs.len() {
            while let Some(task_id) = self.procs[process].queue.pop_front() {
                let discarded = match self.tasks.get_mut(&task_id) {
                    Some(task) => {
                        task.advance(TaskState::Aborted);
                        Some((task.process.clone(), task.attempt))
                    }
                    None => None,
                };
                if let Some((process_name, attempt)) = discarded {
                    self.events.record(TaskEvent::now(
                        task_id,
                        process_name.as_str(),
                        TaskState::Aborted,
                        attempt,
                        None,
                    ));
                }
                self.tasks.remove(&task_id);
            }
        }
    }

    /// Publish buffered outputs contiguously by emission sequence so
    /// downstream channels observe input order.
    fn flush_ready(&mut self, process: usize) {
        loop {
            let flushable = {
                let proc = &mut self.procs[process];
                match proc.ready.remove(&proc.next_pub) {
                    Some(outputs) => {
                        proc.next_pub += 1;
                        Some((outputs, proc.node.outputs.clone()))
                    }
                    None => None,
                }
            };
            let Some((outputs, bindings)) = flushable else {
                return;
            };
            for ((_, channel_name), value) in bindings.iter().zip(outputs) {
                let Some(channel) = self.channels.get(channel_name) else {
                    continue;
                };
                if let Err(e) = channel.send(value) {
                    // A process re-binding a value channel is a definition
                    // bug; fatal for the whole run.
                    tracing::error!(channel = %e.channel, "value channel bound twice at runtime");
                    self.terminate();
                    return;
                }
            }
        }
    }

    /// Close a process's queue outputs once no task of it will ever publish
    /// again, letting closure cascade downstream.
    fn maybe_close_outputs(&mut self, process: usize) {
        if self.mode != Mode::Normal {
            return;
        }
        if !self.procs[process].settled() || self.procs[process].outputs_closed {
            return;
        }
        self.procs[process].outputs_closed = true;
        let bindings = self.procs[process].node.outputs.clone();
        for (_, channel_name) in bindings {
            if let Some(channel) = self.channels.get(&channel_name) {
                channel.close();
            }
        }
    }

    fn process_index(&self, def_index: usize) -> usize {
        self.procs
            .iter()
            .position(|p| p.node.def_index == def_index)
            .unwrap_or(0)
    }
}

/// Watch one submitted attempt: submit, report the running transition, poll
/// on an interval, honor cancellation and the per-task timeout, and report a
/// single terminal outcome.
async fn monitor(
    spec: TaskSpec,
    executor: Arc<dyn Executor>,
    permit: OwnedSemaphorePermit,
    poll_interval: Duration,
    timeout: Option<Duration>,
    cancel: CancellationToken,
    tx: UnboundedSender<MonitorMsg>,
) {
    let task_id = spec.task_id;
    let outcome = watch(&spec, executor.as_ref(), poll_interval, timeout, &cancel, &tx).await;
    // Free the executor slot before the dispatcher learns the task is done,
    // so its next dispatch pass sees the capacity.
    drop(permit);
    let _ = tx.send(MonitorMsg::Finished { task_id, outcome });
}

async fn watch(
    spec: &TaskSpec,
    executor: &dyn Executor,
    poll_interval: Duration,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
    tx: &UnboundedSender<MonitorMsg>,
) -> MonitorOutcome {
    let handle = match executor.submit(spec).await {
        Ok(handle) => handle,
        Err(e) => {
            return MonitorOutcome::BackendFailed {
                reason: e.to_string(),
            }
        }
    };
    let _ = tx.send(MonitorMsg::Running {
        task_id: spec.task_id,
    });

    let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
    loop {
        if cancel.is_cancelled() {
            let _ = executor.kill(&handle).await;
            return MonitorOutcome::Killed;
        }
        if let Some(deadline) = deadline {
            if tokio::time::Instant::now() >= deadline {
                let _ = executor.kill(&handle).await;
                return MonitorOutcome::TimedOut {
                    seconds: timeout.unwrap_or_default().as_secs(),
                };
            }
        }

        match executor.poll(&handle).await {
            Ok(PollStatus::Running) => {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
            Ok(PollStatus::Completed { exit_status }) => {
                return match executor.fetch_outputs(spec, &handle).await {
                    Ok(streams) => MonitorOutcome::Completed {
                        exit_status,
                        streams,
                    },
                    Err(e) => MonitorOutcome::BackendFailed {
                        reason: format!("fetching outputs: {}", e),
                    },
                };
            }
            Ok(PollStatus::Failed { reason }) => return MonitorOutcome::BackendFailed { reason },
            Err(e) => {
                return MonitorOutcome::BackendFailed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// Fatal pre-run error surfaced by the session when a process names an
/// executor kind with no registered implementation.
pub(crate) fn missing_executor_error(kind: ExecutorKind) -> ExecutionError {
    ExecutionError::MissingExecutor(kind.as_str().to_string())
}
