//! Node: the stage unit of the pipeline.
//!
//! Two layers:
//! - **`Worker` trait**: the single extension point. A concrete stage turns
//!   one batch of input signals (one per input port) into one batch of output
//!   signals (one per output port).
//! - **`Node`**: owns the worker, its port bindings, a `WorkerPool` and a
//!   dedicated driver thread that runs the poll → submit → await → push loop.
//!
//! # Run-loop
//!
//! ```text
//! loop while running:
//!   every input non-empty? ── no ──► park on the first empty queue (≤ poll interval)
//!        │ yes
//!   pop one signal per input ─► pool.submit(worker.process) ─► wait
//!        │
//!   outputs.len() == output_count? ── no ──► log, drop batch
//!        │ yes
//!   stamp + push output[i] to every queue bound on port i
//! ```
//!
//! Exactly one batch is in flight per node, whatever the pool width, so output
//! order always matches input order. A wider pool only helps a worker that
//! parallelizes internally.

use crate::config::EngineConfig;
use crate::pipeline::error::{BindError, StartError, StopError, WorkerError};
use crate::pipeline::pool::WorkerPool;
use crate::pipeline::queue::{BoundedQueue, SignalQueueRef, DEFAULT_QUEUE_CAPACITY};
use crate::pipeline::signal::Signal;
use crate::pipeline::stats::{NodeStats, StatsCollector};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Default sleep bound between input polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// The processing contract a concrete stage implements.
///
/// `process` is called exactly once per ready batch, on a pool thread, never
/// concurrently with itself. Routine data problems should come back as a
/// recoverable `WorkerError` (the batch is dropped and logged); `Fatal` stops
/// the node; `EndOfStream` lets a source finish cleanly.
pub trait Worker: Send + 'static {
    /// Called once on `Node::start`, before any batch. An error aborts the start.
    fn init(&mut self) -> Result<(), WorkerError> {
        Ok(())
    }

    /// Turn one input batch into one output batch.
    fn process(&mut self, inputs: Vec<Signal>) -> Result<Vec<Signal>, WorkerError>;

    /// Called once on `Node::stop`, after the last in-flight batch.
    fn shutdown(&mut self) {}
}

/// Progress events reported by a running node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineEvent {
    /// The first batch went through.
    FirstFrameDone,
    /// A batch went through.
    OneFrameDone,
    /// A source reported end of stream.
    AllFrameDone,
}

/// Callback receiving node events together with the node name.
pub type EventHook = Arc<dyn Fn(PipelineEvent, &str) + Send + Sync>;

/// Shared handle to a node.
pub type NodeHandle = Arc<Node>;

/// Lifecycle state. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Some input port is still unbound.
    Created,
    /// Every input port is bound; ready to start.
    Bound,
    Running,
    Stopped,
}

/// What the node is actually doing, including how its loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeHealth {
    Idle,
    Running,
    /// The source reached end of stream.
    Finished,
    /// The worker failed fatally.
    Failed(String),
    Stopped,
}

/// Tunables shared by every node built from the same config.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOptions {
    pub pool_width: usize,
    pub queue_capacity: usize,
    pub poll_interval: Duration,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            pool_width: 1,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl From<&EngineConfig> for NodeOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            pool_width: config.node.pool_width.max(1),
            queue_capacity: config.queue.capacity.max(1),
            poll_interval: Duration::from_millis(config.node.poll_interval_ms).max(MIN_POLL_INTERVAL),
        }
    }
}

/// Builder for a `Node`.
pub struct NodeBuilder {
    name: String,
    inputs: usize,
    outputs: usize,
    options: NodeOptions,
}

impl NodeBuilder {
    pub fn inputs(mut self, count: usize) -> Self {
        self.inputs = count;
        self
    }

    pub fn outputs(mut self, count: usize) -> Self {
        self.outputs = count;
        self
    }

    pub fn options(mut self, options: NodeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn pool_width(mut self, width: usize) -> Self {
        self.options.pool_width = width.max(1);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.options.queue_capacity = capacity.max(1);
        self
    }

    /// Upper bound on one idle wait. Clamped to at least 1 ms.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.options.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn build(self, worker: impl Worker) -> NodeHandle {
        let worker: Box<dyn Worker> = Box::new(worker);
        let state = if self.inputs == 0 {
            NodeState::Bound
        } else {
            NodeState::Created
        };
        Arc::new(Node {
            name: Arc::from(self.name.as_str()),
            input_count: self.inputs,
            output_count: self.outputs,
            options: self.options,
            worker: Arc::new(Mutex::new(worker)),
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(StatsCollector::new()),
            exit: Arc::new(Mutex::new(None)),
            inner: Mutex::new(NodeInner {
                state,
                inputs: vec![None; self.inputs],
                outputs: vec![Vec::new(); self.outputs],
                pool: None,
                driver: None,
                event_hook: None,
            }),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum DriverExit {
    Finished,
    Failed(String),
}

struct NodeInner {
    state: NodeState,
    inputs: Vec<Option<SignalQueueRef>>,
    outputs: Vec<Vec<SignalQueueRef>>,
    pool: Option<Arc<WorkerPool>>,
    driver: Option<JoinHandle<()>>,
    event_hook: Option<EventHook>,
}

/// A pipeline stage: worker + ports + pool + driver thread.
pub struct Node {
    name: Arc<str>,
    input_count: usize,
    output_count: usize,
    options: NodeOptions,
    worker: Arc<Mutex<Box<dyn Worker>>>,
    running: Arc<AtomicBool>,
    stats: Arc<StatsCollector>,
    exit: Arc<Mutex<Option<DriverExit>>>,
    inner: Mutex<NodeInner>,
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Node {
    pub fn builder(name: impl Into<String>) -> NodeBuilder {
        NodeBuilder {
            name: name.into(),
            inputs: 0,
            outputs: 0,
            options: NodeOptions::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_count(&self) -> usize {
        self.input_count
    }

    pub fn output_count(&self) -> usize {
        self.output_count
    }

    pub fn options(&self) -> &NodeOptions {
        &self.options
    }

    pub fn state(&self) -> NodeState {
        lock(&self.inner).state
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn health(&self) -> NodeHealth {
        let state = lock(&self.inner).state;
        let exit = lock(&self.exit).clone();
        match (state, exit) {
            (_, Some(DriverExit::Failed(reason))) => NodeHealth::Failed(reason),
            (NodeState::Created | NodeState::Bound, _) => NodeHealth::Idle,
            (NodeState::Running, None) => NodeHealth::Running,
            (NodeState::Running, Some(DriverExit::Finished)) => NodeHealth::Finished,
            (NodeState::Stopped, _) => NodeHealth::Stopped,
        }
    }

    pub fn stats(&self) -> NodeStats {
        self.stats.snapshot(&self.name)
    }

    // ── Port binding ──

    fn ensure_bindable(&self, inner: &NodeInner) -> Result<(), BindError> {
        match inner.state {
            NodeState::Running | NodeState::Stopped => Err(BindError::AlreadyStarted),
            NodeState::Created | NodeState::Bound => Ok(()),
        }
    }

    /// Whether input `port` already has a queue.
    pub fn is_input_bound(&self, port: usize) -> bool {
        lock(&self.inner)
            .inputs
            .get(port)
            .map(Option::is_some)
            .unwrap_or(false)
    }

    /// Input ports that still have no queue.
    pub fn unbound_inputs(&self) -> Vec<usize> {
        lock(&self.inner)
            .inputs
            .iter()
            .enumerate()
            .filter(|(_, q)| q.is_none())
            .map(|(port, _)| port)
            .collect()
    }

    /// Use `queue` as input `port`. The queue is shared with its producer.
    pub fn attach_input(&self, port: usize, queue: SignalQueueRef) -> Result<(), BindError> {
        let mut inner = lock(&self.inner);
        self.ensure_bindable(&inner)?;
        let slot = inner
            .inputs
            .get_mut(port)
            .ok_or_else(|| BindError::PortOutOfRange {
                node: self.name.to_string(),
                direction: "input",
                port,
                count: self.input_count,
            })?;
        if slot.is_some() {
            return Err(BindError::PortAlreadyBound {
                node: self.name.to_string(),
                port,
            });
        }
        *slot = Some(queue);
        if inner.inputs.iter().all(Option::is_some) {
            inner.state = NodeState::Bound;
        }
        Ok(())
    }

    /// Release input `port` again, undoing a half-finished binding.
    pub(crate) fn detach_input(&self, port: usize) {
        let mut inner = lock(&self.inner);
        if self.ensure_bindable(&inner).is_err() {
            return;
        }
        if let Some(slot) = inner.inputs.get_mut(port) {
            *slot = None;
            inner.state = NodeState::Created;
        }
    }

    /// Add `queue` as a destination of output `port`. A port may feed several
    /// queues; each receives its own clone of every signal.
    pub fn attach_output(&self, port: usize, queue: SignalQueueRef) -> Result<(), BindError> {
        let mut inner = lock(&self.inner);
        self.ensure_bindable(&inner)?;
        let targets = inner
            .outputs
            .get_mut(port)
            .ok_or_else(|| BindError::PortOutOfRange {
                node: self.name.to_string(),
                direction: "output",
                port,
                count: self.output_count,
            })?;
        targets.push(queue);
        Ok(())
    }

    /// Create a fresh queue, bind it as input `port` and return it so the
    /// caller can feed the node directly.
    pub fn open_input(&self, port: usize) -> Result<SignalQueueRef, BindError> {
        let queue = BoundedQueue::shared(self.options.queue_capacity);
        self.attach_input(port, Arc::clone(&queue))?;
        Ok(queue)
    }

    /// Create a fresh queue on output `port` and return it so the caller can
    /// observe what the node emits.
    pub fn open_output(&self, port: usize) -> Result<SignalQueueRef, BindError> {
        let queue = BoundedQueue::shared(self.options.queue_capacity);
        self.attach_output(port, Arc::clone(&queue))?;
        Ok(queue)
    }

    /// Install (or clear) the event callback. Takes effect on the next start.
    pub fn set_event_hook(&self, hook: Option<EventHook>) {
        lock(&self.inner).event_hook = hook;
    }

    // ── Lifecycle ──

    /// Initialize the worker, start the pool and spawn the driver thread.
    pub fn start(&self) -> Result<(), StartError> {
        let mut inner = lock(&self.inner);
        match inner.state {
            NodeState::Running => return Err(StartError::AlreadyRunning(self.name.to_string())),
            NodeState::Stopped => return Err(StartError::Terminal(self.name.to_string())),
            NodeState::Created | NodeState::Bound => {}
        }
        if let Some(port) = inner.inputs.iter().position(Option::is_none) {
            return Err(StartError::Unbound {
                node: self.name.to_string(),
                port,
            });
        }
        let inputs: Vec<SignalQueueRef> = inner.inputs.iter().flatten().cloned().collect();
        let unconnected = inner.outputs.iter().filter(|q| q.is_empty()).count();
        if unconnected > 0 {
            tracing::warn!(
                "Node '{}' has {} unconnected output port(s); their signals are discarded",
                self.name,
                unconnected
            );
        }

        lock(&self.worker)
            .init()
            .map_err(|source| StartError::Init {
                node: self.name.to_string(),
                source,
            })?;

        let pool = Arc::new(WorkerPool::new(
            self.name.to_string(),
            self.options.pool_width,
        ));
        if let Err(source) = pool.start() {
            lock(&self.worker).shutdown();
            return Err(StartError::Pool {
                node: self.name.to_string(),
                source,
            });
        }

        *lock(&self.exit) = None;
        self.running.store(true, Ordering::Release);

        let driver = Driver {
            name: Arc::clone(&self.name),
            inputs,
            outputs: inner.outputs.clone(),
            output_count: self.output_count,
            pool: Arc::clone(&pool),
            worker: Arc::clone(&self.worker),
            running: Arc::clone(&self.running),
            stats: Arc::clone(&self.stats),
            exit: Arc::clone(&self.exit),
            hook: inner.event_hook.clone(),
            poll_interval: self.options.poll_interval,
        };
        let spawned = std::thread::Builder::new()
            .name(format!("{}-driver", self.name))
            .spawn(move || driver.run());

        match spawned {
            Ok(handle) => {
                inner.pool = Some(pool);
                inner.driver = Some(handle);
                inner.state = NodeState::Running;
                tracing::info!(
                    "Node '{}' started ({} in / {} out, pool width {})",
                    self.name,
                    self.input_count,
                    self.output_count,
                    self.options.pool_width
                );
                Ok(())
            }
            Err(source) => {
                self.running.store(false, Ordering::Release);
                pool.stop();
                lock(&self.worker).shutdown();
                Err(StartError::Spawn {
                    node: self.name.to_string(),
                    source,
                })
            }
        }
    }

    /// Stop the run-loop and wait for the in-flight batch, the driver thread
    /// and every pool thread. Stopping an already stopped node is a no-op.
    ///
    /// Returns an error when the worker failed while running; the node is
    /// stopped either way.
    pub fn stop(&self) -> Result<(), StopError> {
        let (driver, pool) = {
            let mut inner = lock(&self.inner);
            match inner.state {
                NodeState::Stopped => return Ok(()),
                NodeState::Created | NodeState::Bound => {
                    inner.state = NodeState::Stopped;
                    tracing::debug!("Node '{}' stopped before start", self.name);
                    return Ok(());
                }
                NodeState::Running => {}
            }
            self.running.store(false, Ordering::Release);
            inner.state = NodeState::Stopped;
            (inner.driver.take(), inner.pool.take())
        };

        let mut result = Ok(());
        if let Some(handle) = driver {
            if handle.thread().id() == std::thread::current().id() {
                // Stopped from an event hook; the driver exits once the hook returns.
                tracing::debug!("Node '{}' stopped from its own driver thread", self.name);
            } else if handle.join().is_err() {
                tracing::error!("Node '{}' driver thread panicked", self.name);
                result = Err(StopError::DriverPanicked(self.name.to_string()));
            }
        }
        if let Some(pool) = pool {
            pool.stop();
        }
        lock(&self.worker).shutdown();

        if let Some(DriverExit::Failed(reason)) = lock(&self.exit).clone() {
            result = Err(StopError::StageFailed {
                node: self.name.to_string(),
                reason,
            });
        }
        tracing::info!("Node '{}' stopped", self.name);
        result
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if self.state() == NodeState::Running {
            if let Err(e) = self.stop() {
                tracing::warn!("Node '{}' dropped while running: {}", self.name, e);
            }
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("inputs", &self.input_count)
            .field("outputs", &self.output_count)
            .field("state", &self.state())
            .finish()
    }
}

/// Everything the driver thread needs, detached from the `Node` itself.
struct Driver {
    name: Arc<str>,
    inputs: Vec<SignalQueueRef>,
    outputs: Vec<Vec<SignalQueueRef>>,
    output_count: usize,
    pool: Arc<WorkerPool>,
    worker: Arc<Mutex<Box<dyn Worker>>>,
    running: Arc<AtomicBool>,
    stats: Arc<StatsCollector>,
    exit: Arc<Mutex<Option<DriverExit>>>,
    hook: Option<EventHook>,
    poll_interval: Duration,
}

impl Driver {
    fn run(self) {
        tracing::debug!("Node '{}' driver thread started", self.name);
        let exit = self.run_loop();

        match &exit {
            Some(DriverExit::Finished) => {
                tracing::info!("Node '{}' reached end of stream", self.name);
            }
            Some(DriverExit::Failed(reason)) => {
                tracing::error!("Node '{}' failed: {}", self.name, reason);
            }
            None => {}
        }
        let finished = exit == Some(DriverExit::Finished);
        if exit.is_some() {
            *lock(&self.exit) = exit;
            self.running.store(false, Ordering::Release);
        }
        if finished {
            self.emit(PipelineEvent::AllFrameDone);
        }
        tracing::debug!("Node '{}' driver thread exiting", self.name);
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(hook) = &self.hook {
            hook(event, &self.name);
        }
    }

    fn run_loop(&self) -> Option<DriverExit> {
        let mut first_frame = true;

        while self.running.load(Ordering::Acquire) {
            let Some(batch) = self.next_batch() else {
                continue;
            };

            let worker = Arc::clone(&self.worker);
            let started = Instant::now();
            let handle = match self.pool.submit(move || {
                let mut worker = lock(&worker);
                worker.process(batch)
            }) {
                Ok(handle) => handle,
                Err(e) => return Some(DriverExit::Failed(format!("submit failed: {}", e))),
            };
            let result = handle.wait();
            self.stats.record_iteration(started.elapsed());

            let outputs = match result {
                Ok(Ok(outputs)) => outputs,
                Ok(Err(WorkerError::EndOfStream)) => return Some(DriverExit::Finished),
                Ok(Err(e)) if e.is_fatal() => return Some(DriverExit::Failed(e.to_string())),
                Ok(Err(e)) => {
                    tracing::warn!("Node '{}' dropped a batch: {}", self.name, e);
                    self.stats.record_recoverable_error();
                    continue;
                }
                Err(e) => return Some(DriverExit::Failed(e.to_string())),
            };

            if outputs.len() != self.output_count {
                tracing::warn!(
                    "Node '{}' worker returned {} output(s), expected {}; batch dropped",
                    self.name,
                    outputs.len(),
                    self.output_count
                );
                self.stats.record_arity_drop();
                continue;
            }

            self.dispatch(outputs);
            self.stats.record_completed();

            if first_frame {
                first_frame = false;
                self.emit(PipelineEvent::FirstFrameDone);
            }
            self.emit(PipelineEvent::OneFrameDone);
        }
        None
    }

    /// Pop one signal from every input, or wait (bounded) for the first empty
    /// one and return `None` so the caller re-checks the running flag.
    fn next_batch(&self) -> Option<Vec<Signal>> {
        if self.inputs.is_empty() {
            return Some(Vec::new());
        }
        if let Some(empty) = self.inputs.iter().find(|q| q.is_empty()) {
            empty.wait_non_empty(self.poll_interval);
            return None;
        }

        // Only this thread pops, so a non-empty input stays non-empty.
        let mut batch = Vec::with_capacity(self.inputs.len());
        for (port, queue) in self.inputs.iter().enumerate() {
            match queue.pop() {
                Some(signal) => batch.push(signal),
                None => {
                    tracing::warn!(
                        "Node '{}' input {} emptied while popping; partial batch dropped",
                        self.name,
                        port
                    );
                    return None;
                }
            }
        }
        Some(batch)
    }

    fn dispatch(&self, outputs: Vec<Signal>) {
        for (port, mut signal) in outputs.into_iter().enumerate() {
            let Some((last, rest)) = self.outputs[port].split_last() else {
                tracing::trace!("Node '{}' output {} unconnected", self.name, port);
                continue;
            };
            signal.stamp(&self.name);
            let latency = signal.latency();
            for queue in rest {
                if queue.push(signal.clone()).is_some() {
                    self.stats.record_overflow();
                }
            }
            if last.push(signal).is_some() {
                self.stats.record_overflow();
            }
            self.stats.record_emitted(latency);
        }
    }
}
