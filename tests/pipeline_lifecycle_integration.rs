//! Integration tests for pipeline lifecycle
//!
//! These tests drive real nodes on real threads:
//! - End-to-end chains and DAG topologies
//! - Serialized processing and graceful shutdown
//! - Recoverable and fatal worker errors
//! - Atomic binding and start rollback

mod common;

use common::builders::{increment_chain, increment_node, Increment, SlowWorker};
use common::{test_timeout, wait_until};
use cvinfer_rs::pipeline::workers::{CollectSink, Passthrough, SequenceSource};
use cvinfer_rs::pipeline::{
    BindError, GraphState, Node, NodeHealth, NodeState, PipelineEvent, PipelineGraph, Signal,
    StartError, StopError, Worker, WorkerError,
};
use mockall::mock;
use serial_test::serial;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

mock! {
    pub StageWorker {}

    impl Worker for StageWorker {
        fn init(&mut self) -> Result<(), WorkerError>;
        fn process(&mut self, inputs: Vec<Signal>) -> Result<Vec<Signal>, WorkerError>;
        fn shutdown(&mut self);
    }
}

#[test]
fn test_four_stage_increment_chain() {
    let chain = increment_chain(4);
    let input = chain[0].open_input(0).unwrap();
    let observer = chain[3].open_output(0).unwrap();

    let mut graph = PipelineGraph::new("increment");
    graph.bind_all(chain.clone()).unwrap();
    assert_eq!(graph.edges().len(), 3);
    assert!(graph.check());

    graph.start().unwrap();
    assert_eq!(graph.state(), GraphState::Running);
    input.push(Signal::from(0i64));

    assert!(wait_until(test_timeout(), || observer.len() == 1));
    graph.stop().unwrap();

    assert_eq!(observer.len(), 1);
    let result = observer.pop().unwrap();
    assert_eq!(result.as_i64(), Some(4));
    let stages: Vec<&str> = result.stamps().iter().map(|s| &*s.stage).collect();
    assert_eq!(stages, vec!["inc-0", "inc-1", "inc-2", "inc-3"]);
    for node in &chain {
        assert_eq!(node.state(), NodeState::Stopped);
    }
}

#[test]
#[serial]
fn test_single_batch_in_flight_despite_pool_width() {
    let delay = Duration::from_millis(20);
    let batches = 5;
    let node = Node::builder("slow")
        .inputs(1)
        .outputs(1)
        .pool_width(4)
        .build(SlowWorker::new(delay));
    let input = node.open_input(0).unwrap();
    let output = node.open_output(0).unwrap();

    for i in 0..batches {
        input.push(Signal::from(i as i64));
    }
    let started = Instant::now();
    node.start().unwrap();
    assert!(wait_until(test_timeout(), || output.len() == batches));
    let elapsed = started.elapsed();
    node.stop().unwrap();

    assert!(
        elapsed >= delay * batches as u32,
        "{} batches took {:?}, expected at least {:?}",
        batches,
        elapsed,
        delay * batches as u32
    );
    let order: Vec<i64> = std::iter::from_fn(|| output.pop())
        .filter_map(|s| s.as_i64())
        .collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
}

#[test]
#[serial]
fn test_stop_waits_for_in_flight_worker() {
    let worker = SlowWorker::new(Duration::from_millis(150));
    let entered = Arc::clone(&worker.entered);
    let finished = Arc::clone(&worker.finished);
    let node = Node::builder("busy").inputs(1).outputs(1).build(worker);
    let input = node.open_input(0).unwrap();
    let output = node.open_output(0).unwrap();

    node.start().unwrap();
    input.push(Signal::from(7i64));
    assert!(wait_until(test_timeout(), || entered.load(Ordering::SeqCst)));

    node.stop().unwrap();
    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(output.pop().and_then(|s| s.as_i64()), Some(7));
    assert_eq!(node.health(), NodeHealth::Stopped);
}

#[test]
fn test_type_mismatch_drops_batch_and_continues() {
    let node = increment_node("typed");
    let input = node.open_input(0).unwrap();
    let output = node.open_output(0).unwrap();
    node.start().unwrap();

    input.push(Signal::from("not a number"));
    input.push(Signal::from(1i64));

    assert!(wait_until(test_timeout(), || output.len() == 1));
    node.stop().unwrap();

    assert_eq!(output.pop().and_then(|s| s.as_i64()), Some(2));
    let stats = node.stats();
    assert_eq!(stats.iterations, 2);
    assert_eq!(stats.recoverable_errors, 1);
    assert_eq!(stats.completed, 1);
}

#[test]
fn test_bind_all_arity_mismatch_leaves_no_queues() {
    let source = Node::builder("source")
        .outputs(1)
        .build(SequenceSource::counter(1));
    let mid = increment_node("mid");
    let pair_sink = Node::builder("pair-sink")
        .inputs(2)
        .build(CollectSink::new());

    let mut graph = PipelineGraph::new("mismatch");
    let err = graph
        .bind_all(vec![Arc::clone(&source), Arc::clone(&mid), Arc::clone(&pair_sink)])
        .unwrap_err();

    assert_eq!(
        err,
        BindError::ArityMismatch {
            upstream: "mid".to_string(),
            outputs: 1,
            downstream: "pair-sink".to_string(),
            inputs: 2,
        }
    );
    assert!(graph.edges().is_empty());
    assert!(graph.queue_stats().is_empty());
    assert_eq!(mid.unbound_inputs(), vec![0]);
    assert_eq!(pair_sink.unbound_inputs(), vec![0, 1]);
    assert!(PipelineGraph::check_chain(&[source, mid]).is_ok());
}

#[test]
fn test_source_to_sink_with_events() {
    let sink = CollectSink::new();
    let collected = sink.buffer();
    let mut nodes = vec![Node::builder("source")
        .outputs(1)
        .build(SequenceSource::counter(5))];
    nodes.extend(increment_chain(2));
    nodes.push(Node::builder("sink").inputs(1).build(sink));

    let first = Arc::new(AtomicUsize::new(0));
    let frames = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(Mutex::new(Vec::<String>::new()));

    let mut graph = PipelineGraph::new("events");
    graph.bind_all(nodes).unwrap();
    {
        let first = Arc::clone(&first);
        graph.register_callback(PipelineEvent::FirstFrameDone, move |_| {
            first.fetch_add(1, Ordering::SeqCst);
        });
    }
    {
        let frames = Arc::clone(&frames);
        graph.register_callback(PipelineEvent::OneFrameDone, move |node| {
            assert_eq!(node, "sink");
            frames.fetch_add(1, Ordering::SeqCst);
        });
    }
    {
        let finished = Arc::clone(&finished);
        graph.register_callback(PipelineEvent::AllFrameDone, move |node| {
            finished.lock().unwrap().push(node.to_string());
        });
    }

    graph.start().unwrap();
    assert!(wait_until(test_timeout(), || collected.len() == 5));
    assert!(wait_until(test_timeout(), || !finished.lock().unwrap().is_empty()));
    graph.stop().unwrap();

    let values: Vec<i64> = collected.port(0).iter().filter_map(Signal::as_i64).collect();
    assert_eq!(values, vec![2, 3, 4, 5, 6]);
    let frame_indices: Vec<u64> = collected.port(0).iter().map(Signal::frame_index).collect();
    assert_eq!(frame_indices, vec![0, 1, 2, 3, 4]);

    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(frames.load(Ordering::SeqCst), 5);
    assert_eq!(*finished.lock().unwrap(), vec!["source".to_string()]);
    assert_eq!(graph.stats()[0].emitted, 5);
}

#[test]
fn test_fan_out_fan_in() {
    let sink = CollectSink::new();
    let collected = sink.buffer();

    let mut graph = PipelineGraph::new("diamond");
    let src = graph
        .add_node(Node::builder("source").outputs(1).build(SequenceSource::counter(3)))
        .unwrap();
    let ones = graph
        .add_node(Node::builder("plus-one").inputs(1).outputs(1).build(Increment { step: 1 }))
        .unwrap();
    let tens = graph
        .add_node(Node::builder("plus-ten").inputs(1).outputs(1).build(Increment { step: 10 }))
        .unwrap();
    let tap = graph
        .add_node(Node::builder("tap").inputs(2).outputs(2).build(Passthrough))
        .unwrap();
    let join = graph
        .add_node(Node::builder("join").inputs(2).build(sink))
        .unwrap();

    graph.connect(src, 0, ones, 0).unwrap();
    graph.connect(src, 0, tens, 0).unwrap();
    graph.connect(ones, 0, tap, 0).unwrap();
    graph.connect(tens, 0, tap, 1).unwrap();
    graph.connect(tap, 0, join, 0).unwrap();
    graph.connect(tap, 1, join, 1).unwrap();
    assert_eq!(
        graph.connect(join, 0, src, 0),
        Err(BindError::PortOutOfRange {
            node: "join".to_string(),
            direction: "output",
            port: 0,
            count: 0,
        })
    );
    assert!(graph.check());

    graph.start().unwrap();
    assert!(wait_until(test_timeout(), || collected.len() == 3));
    graph.stop().unwrap();

    let pairs: Vec<(i64, i64)> = collected
        .batches()
        .iter()
        .map(|b| (b[0].as_i64().unwrap(), b[1].as_i64().unwrap()))
        .collect();
    assert_eq!(pairs, vec![(1, 10), (2, 11), (3, 12)]);
}

#[test]
fn test_start_failure_rolls_back_started_nodes() {
    let mut mock = MockStageWorker::new();
    mock.expect_init()
        .times(1)
        .returning(|| Err(WorkerError::Fatal("model file missing".to_string())));
    mock.expect_process().never();

    let source = Node::builder("source")
        .outputs(1)
        .build(SequenceSource::counter(1_000_000).with_interval(Duration::from_millis(1)));
    let infer = Node::builder("infer").inputs(1).outputs(1).build(mock);
    let sink = Node::builder("sink").inputs(1).build(CollectSink::new());

    let mut graph = PipelineGraph::new("rollback");
    graph
        .bind_all(vec![Arc::clone(&source), Arc::clone(&infer), Arc::clone(&sink)])
        .unwrap();

    match graph.start() {
        Err(StartError::Stage { node, source }) => {
            assert_eq!(node, "infer");
            assert!(matches!(*source, StartError::Init { .. }));
        }
        other => panic!("unexpected start result: {:?}", other),
    }

    assert_eq!(graph.state(), GraphState::Stopped);
    assert_eq!(source.state(), NodeState::Stopped);
    assert!(!source.is_running());
    assert_eq!(infer.state(), NodeState::Bound);
    assert_eq!(sink.state(), NodeState::Bound);
    assert!(matches!(graph.start(), Err(StartError::GraphTerminal)));
}

#[test]
fn test_fatal_worker_error_surfaces_on_stop() {
    let mut mock = MockStageWorker::new();
    mock.expect_init().times(1).returning(|| Ok(()));
    mock.expect_process()
        .times(1)
        .returning(|_| Err(WorkerError::Fatal("backend lost".to_string())));
    mock.expect_shutdown().times(1).return_const(());

    let infer = Node::builder("infer").inputs(1).outputs(1).build(mock);
    let input = infer.open_input(0).unwrap();
    let mut graph = PipelineGraph::new("fatal");
    graph
        .bind(&infer, &Node::builder("sink").inputs(1).build(CollectSink::new()))
        .unwrap();

    graph.start().unwrap();
    input.push(Signal::from(1i64));
    input.push(Signal::from(2i64));
    assert!(wait_until(test_timeout(), || !graph.failures().is_empty()));
    assert_eq!(
        graph.health()[0],
        ("infer".to_string(), NodeHealth::Failed("Fatal stage error: backend lost".to_string()))
    );

    match graph.stop() {
        Err(StopError::StageFailures(failures)) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].node, "infer");
        }
        other => panic!("unexpected stop result: {:?}", other),
    }
    // A second stop is a no-op.
    assert!(graph.stop().is_ok());
}

#[test]
fn test_node_stop_is_idempotent_and_terminal() {
    let node = increment_node("terminal");
    node.open_input(0).unwrap();
    node.start().unwrap();
    assert!(matches!(node.start(), Err(StartError::AlreadyRunning(_))));
    node.stop().unwrap();
    node.stop().unwrap();
    assert!(matches!(node.start(), Err(StartError::Terminal(_))));
    assert_eq!(
        node.attach_output(0, cvinfer_rs::pipeline::BoundedQueue::shared(4)),
        Err(BindError::AlreadyStarted)
    );
}
