//! Pipeline graph: topology binder and lifecycle controller.
//!
//! Nodes are wired by edges; every edge owns one fresh `BoundedQueue` that
//! connects an output port of the upstream node to an input port of the
//! downstream node. A linear chain is just the special case produced by
//! `bind_all`; `connect` adds arbitrary DAG edges (fan-out, fan-in).
//!
//! # Lifecycle
//!
//! ```text
//! Empty ──bind/add──► Bound ──start──► Running ──stop──► Stopped
//! ```
//!
//! Every binding check runs before the first queue is created, so a failed
//! bind leaves the graph exactly as it was. `start` walks the nodes in
//! topological order (sources first) and rolls back on the first failure.

use crate::pipeline::error::{BindError, StageFailure, StartError, StopError};
use crate::pipeline::id::{EdgeId, NodeId};
use crate::pipeline::node::{EventHook, NodeHandle, NodeHealth, NodeState, PipelineEvent};
use crate::pipeline::queue::{BoundedQueue, QueueStats, SignalQueueRef};
use crate::pipeline::stats::NodeStats;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Callback registered for a pipeline event. Receives the reporting node's name.
pub type EventCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// A queue binding between two node ports.
#[derive(Debug, Clone)]
pub struct Edge {
    pub id: EdgeId,
    pub from_node: NodeId,
    pub from_port: usize,
    pub to_node: NodeId,
    pub to_port: usize,
    pub queue: SignalQueueRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    Empty,
    Bound,
    Running,
    Stopped,
}

/// A set of nodes, the queues between them and their combined lifecycle.
pub struct PipelineGraph {
    name: String,
    nodes: Vec<NodeHandle>,
    edges: Vec<Edge>,
    state: GraphState,
    callbacks: Arc<Mutex<HashMap<PipelineEvent, EventCallback>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PipelineGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            state: GraphState::Empty,
            callbacks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> GraphState {
        self.state
    }

    pub fn nodes(&self) -> &[NodeHandle] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeHandle> {
        self.nodes.get(id.index())
    }

    /// Look up the id of a node already in the graph.
    pub fn node_id(&self, node: &NodeHandle) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| Arc::ptr_eq(n, node))
            .map(|i| NodeId(i as u32))
    }

    // ── Graph building ──

    fn ensure_mutable(&self) -> Result<(), BindError> {
        match self.state {
            GraphState::Running | GraphState::Stopped => Err(BindError::AlreadyStarted),
            GraphState::Empty | GraphState::Bound => Ok(()),
        }
    }

    fn ensure_node_unstarted(node: &NodeHandle) -> Result<(), BindError> {
        match node.state() {
            NodeState::Running | NodeState::Stopped => Err(BindError::AlreadyStarted),
            NodeState::Created | NodeState::Bound => Ok(()),
        }
    }

    fn ensure_inputs_free(node: &NodeHandle) -> Result<(), BindError> {
        match (0..node.input_count()).find(|&port| node.is_input_bound(port)) {
            Some(port) => Err(BindError::PortAlreadyBound {
                node: node.name().to_string(),
                port,
            }),
            None => Ok(()),
        }
    }

    fn intern(&mut self, node: &NodeHandle) -> NodeId {
        if let Some(id) = self.node_id(node) {
            return id;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Arc::clone(node));
        self.state = GraphState::Bound;
        id
    }

    /// Add a node without wiring it.
    pub fn add_node(&mut self, node: NodeHandle) -> Result<NodeId, BindError> {
        self.ensure_mutable()?;
        if self.node_id(&node).is_some() {
            return Err(BindError::DuplicateNode(node.name().to_string()));
        }
        Self::ensure_node_unstarted(&node)?;
        Ok(self.intern(&node))
    }

    /// Validate that adjacent nodes of a chain have matching arity, without
    /// binding anything.
    pub fn check_chain(nodes: &[NodeHandle]) -> Result<(), BindError> {
        for (i, node) in nodes.iter().enumerate() {
            if nodes[..i].iter().any(|n| Arc::ptr_eq(n, node)) {
                return Err(BindError::DuplicateNode(node.name().to_string()));
            }
        }
        for pair in nodes.windows(2) {
            let (upstream, downstream) = (&pair[0], &pair[1]);
            if upstream.output_count() != downstream.input_count() {
                tracing::error!(
                    "Node '{}' output count {} does not match node '{}' input count {}",
                    upstream.name(),
                    upstream.output_count(),
                    downstream.name(),
                    downstream.input_count()
                );
                return Err(BindError::ArityMismatch {
                    upstream: upstream.name().to_string(),
                    outputs: upstream.output_count(),
                    downstream: downstream.name().to_string(),
                    inputs: downstream.input_count(),
                });
            }
        }
        Ok(())
    }

    /// Populate an empty graph with `nodes` and bind each node's outputs to
    /// the next node's inputs, port by port.
    ///
    /// All-or-nothing: on error no node is added and no queue is created.
    pub fn bind_all(&mut self, nodes: Vec<NodeHandle>) -> Result<(), BindError> {
        self.ensure_mutable()?;
        if !self.nodes.is_empty() {
            return Err(BindError::AlreadyBound);
        }
        Self::check_chain(&nodes)?;
        for node in &nodes {
            Self::ensure_node_unstarted(node)?;
        }
        for downstream in nodes.iter().skip(1) {
            Self::ensure_inputs_free(downstream)?;
        }

        let ids: Vec<NodeId> = nodes.iter().map(|n| self.intern(n)).collect();
        for pair in ids.windows(2) {
            self.link(pair[0], pair[1])?;
        }
        tracing::info!(
            "Pipeline '{}' bound {} node(s) with {} queue(s)",
            self.name,
            self.nodes.len(),
            self.edges.len()
        );
        Ok(())
    }

    /// Bind every output of `upstream` to the matching input of `downstream`.
    /// Nodes not yet in the graph are added.
    pub fn bind(&mut self, upstream: &NodeHandle, downstream: &NodeHandle) -> Result<(), BindError> {
        self.ensure_mutable()?;
        if Arc::ptr_eq(upstream, downstream) {
            return Err(BindError::CycleDetected);
        }
        Self::check_chain(&[Arc::clone(upstream), Arc::clone(downstream)])?;
        Self::ensure_node_unstarted(upstream)?;
        Self::ensure_node_unstarted(downstream)?;
        Self::ensure_inputs_free(downstream)?;
        if let (Some(from), Some(to)) = (self.node_id(upstream), self.node_id(downstream)) {
            if self.would_create_cycle(from, to) {
                return Err(BindError::CycleDetected);
            }
        }

        let from = self.intern(upstream);
        let to = self.intern(downstream);
        self.link(from, to)
    }

    /// Add a single edge from output `from_port` of `from` to input `to_port`
    /// of `to`. Used for fan-out and fan-in topologies.
    pub fn connect(
        &mut self,
        from: NodeId,
        from_port: usize,
        to: NodeId,
        to_port: usize,
    ) -> Result<EdgeId, BindError> {
        self.ensure_mutable()?;
        let upstream = self.node(from).ok_or(BindError::UnknownNode(from))?;
        let downstream = self.node(to).ok_or(BindError::UnknownNode(to))?;
        if from_port >= upstream.output_count() {
            return Err(BindError::PortOutOfRange {
                node: upstream.name().to_string(),
                direction: "output",
                port: from_port,
                count: upstream.output_count(),
            });
        }
        if to_port >= downstream.input_count() {
            return Err(BindError::PortOutOfRange {
                node: downstream.name().to_string(),
                direction: "input",
                port: to_port,
                count: downstream.input_count(),
            });
        }
        if downstream.is_input_bound(to_port) {
            return Err(BindError::PortAlreadyBound {
                node: downstream.name().to_string(),
                port: to_port,
            });
        }
        if from == to || self.would_create_cycle(from, to) {
            return Err(BindError::CycleDetected);
        }
        self.connect_unchecked(from, from_port, to, to_port)
    }

    fn link(&mut self, from: NodeId, to: NodeId) -> Result<(), BindError> {
        let ports = self.nodes[from.index()].output_count();
        for port in 0..ports {
            self.connect_unchecked(from, port, to, port)?;
        }
        Ok(())
    }

    fn connect_unchecked(
        &mut self,
        from: NodeId,
        from_port: usize,
        to: NodeId,
        to_port: usize,
    ) -> Result<EdgeId, BindError> {
        let upstream = Arc::clone(&self.nodes[from.index()]);
        let downstream = Arc::clone(&self.nodes[to.index()]);
        let queue = BoundedQueue::shared(upstream.options().queue_capacity);
        downstream.attach_input(to_port, Arc::clone(&queue))?;
        if let Err(e) = upstream.attach_output(from_port, Arc::clone(&queue)) {
            downstream.detach_input(to_port);
            return Err(e);
        }

        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(Edge {
            id,
            from_node: from,
            from_port,
            to_node: to,
            to_port,
            queue,
        });
        tracing::debug!(
            "Bound '{}'[{}] -> '{}'[{}] as {:?}",
            upstream.name(),
            from_port,
            downstream.name(),
            to_port,
            id
        );
        Ok(id)
    }

    /// Check if adding an edge from `from` to `to` would create a cycle.
    fn would_create_cycle(&self, from: NodeId, to: NodeId) -> bool {
        // If `to` can already reach `from`, adding from->to closes a loop.
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![to];

        while let Some(current) = stack.pop() {
            if current == from {
                return true;
            }
            let idx = current.index();
            if idx >= self.nodes.len() || visited[idx] {
                continue;
            }
            visited[idx] = true;
            for edge in &self.edges {
                if edge.from_node == current {
                    stack.push(edge.to_node);
                }
            }
        }
        false
    }

    // ── Topological sort (Kahn's algorithm) ──

    /// Node indices ordered so that every producer precedes its consumers.
    /// Shorter than `nodes()` if the graph has a cycle.
    pub fn topological_order(&self) -> Vec<usize> {
        let n = self.nodes.len();
        let mut in_degree = vec![0u32; n];
        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];

        for edge in &self.edges {
            let from = edge.from_node.index();
            let to = edge.to_node.index();
            if from < n && to < n {
                adj[from].push(to);
                in_degree[to] += 1;
            }
        }

        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(node) = queue.pop_front() {
            order.push(node);
            for &next in &adj[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }
        order
    }

    fn readiness(&self) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("graph has no nodes".to_string());
        }
        for node in &self.nodes {
            if let Some(port) = node.unbound_inputs().first() {
                return Err(format!(
                    "node '{}' input port {} is not bound",
                    node.name(),
                    port
                ));
            }
        }
        for edge in &self.edges {
            let upstream = &self.nodes[edge.from_node.index()];
            let downstream = &self.nodes[edge.to_node.index()];
            if edge.from_port >= upstream.output_count() || edge.to_port >= downstream.input_count()
            {
                return Err(format!("edge {:?} references a missing port", edge.id));
            }
        }
        if self.topological_order().len() != self.nodes.len() {
            return Err("graph has a cycle".to_string());
        }
        Ok(())
    }

    /// Whether the bound graph is ready to start: every input port bound,
    /// every edge within port range and no cycles.
    pub fn check(&self) -> bool {
        match self.readiness() {
            Ok(()) => true,
            Err(reason) => {
                tracing::warn!("Pipeline '{}' check failed: {}", self.name, reason);
                false
            }
        }
    }

    // ── Events ──

    /// Register `callback` for `event`, replacing any previous one.
    ///
    /// Frame events are reported by sink nodes (no outgoing edges);
    /// `AllFrameDone` is reported by any node whose worker ends its stream.
    pub fn register_callback(
        &mut self,
        event: PipelineEvent,
        callback: impl Fn(&str) + Send + Sync + 'static,
    ) {
        lock(&self.callbacks).insert(event, Arc::new(callback));
    }

    fn install_hooks(&self) {
        let mut has_outgoing = vec![false; self.nodes.len()];
        for edge in &self.edges {
            has_outgoing[edge.from_node.index()] = true;
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            let is_sink = !has_outgoing[idx];
            let callbacks = Arc::clone(&self.callbacks);
            let hook: EventHook = Arc::new(move |event, name| {
                if event != PipelineEvent::AllFrameDone && !is_sink {
                    return;
                }
                let callback = lock(&callbacks).get(&event).cloned();
                if let Some(callback) = callback {
                    callback(name);
                }
            });
            node.set_event_hook(Some(hook));
        }
    }

    // ── Lifecycle ──

    /// Start every node, sources first. If any node fails to start, the nodes
    /// already started are stopped again and the graph becomes `Stopped`.
    pub fn start(&mut self) -> Result<(), StartError> {
        match self.state {
            GraphState::Running => return Err(StartError::AlreadyRunning(self.name.clone())),
            GraphState::Stopped => return Err(StartError::GraphTerminal),
            GraphState::Empty => return Err(StartError::EmptyGraph),
            GraphState::Bound => {}
        }
        self.readiness().map_err(StartError::NotReady)?;
        self.install_hooks();

        let order = self.topological_order();
        let mut started: Vec<usize> = Vec::with_capacity(order.len());
        for idx in order {
            let node = &self.nodes[idx];
            if let Err(e) = node.start() {
                tracing::error!("Node '{}' start failed: {}", node.name(), e);
                for &done in started.iter().rev() {
                    if let Err(stop_err) = self.nodes[done].stop() {
                        tracing::warn!(
                            "Node '{}' reported while rolling back: {}",
                            self.nodes[done].name(),
                            stop_err
                        );
                    }
                }
                self.state = GraphState::Stopped;
                return Err(StartError::Stage {
                    node: node.name().to_string(),
                    source: Box::new(e),
                });
            }
            started.push(idx);
        }

        self.state = GraphState::Running;
        tracing::info!(
            "Pipeline '{}' started {} node(s)",
            self.name,
            self.nodes.len()
        );
        Ok(())
    }

    /// Stop every node and join all threads. Idempotent.
    ///
    /// Returns `StopError::StageFailures` if any stage failed while running;
    /// every node is stopped regardless.
    pub fn stop(&mut self) -> Result<(), StopError> {
        if self.state == GraphState::Stopped {
            return Ok(());
        }

        let mut failures = Vec::new();
        for node in &self.nodes {
            match node.stop() {
                Ok(()) => {}
                Err(StopError::StageFailed { node, reason }) => {
                    failures.push(StageFailure { node, reason })
                }
                Err(StopError::DriverPanicked(node)) => failures.push(StageFailure {
                    node,
                    reason: "driver thread panicked".to_string(),
                }),
                Err(StopError::StageFailures(inner)) => failures.extend(inner),
            }
        }
        self.state = GraphState::Stopped;
        tracing::info!("Pipeline '{}' stopped", self.name);

        if failures.is_empty() {
            Ok(())
        } else {
            Err(StopError::StageFailures(failures))
        }
    }

    // ── Inspection ──

    /// Health of every node, in graph order.
    pub fn health(&self) -> Vec<(String, NodeHealth)> {
        self.nodes
            .iter()
            .map(|n| (n.name().to_string(), n.health()))
            .collect()
    }

    /// Stages that have failed fatally so far.
    pub fn failures(&self) -> Vec<StageFailure> {
        self.nodes
            .iter()
            .filter_map(|n| match n.health() {
                NodeHealth::Failed(reason) => Some(StageFailure {
                    node: n.name().to_string(),
                    reason,
                }),
                _ => None,
            })
            .collect()
    }

    pub fn stats(&self) -> Vec<NodeStats> {
        self.nodes.iter().map(|n| n.stats()).collect()
    }

    pub fn queue_stats(&self) -> Vec<(EdgeId, QueueStats)> {
        self.edges.iter().map(|e| (e.id, e.queue.stats())).collect()
    }
}

impl Drop for PipelineGraph {
    fn drop(&mut self) {
        if self.state == GraphState::Running {
            if let Err(e) = self.stop() {
                tracing::warn!("Pipeline '{}' dropped while running: {}", self.name, e);
            }
        }
    }
}

impl std::fmt::Debug for PipelineGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineGraph")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("nodes", &self.nodes.len())
            .field("edges", &self.edges.len())
            .finish()
    }
}
