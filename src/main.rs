//! cvinfer-rs demo - runs a synthetic counter pipeline
//!
//! A `SequenceSource` feeds `demo.stages` increment stages into a collecting
//! sink. The run ends when the source is exhausted (all frames reached the
//! sink) or after `demo.max_run_secs`, whichever comes first.
//!
//! Usage: `cvinfer-rs [CONFIG_PATH]` (defaults to the platform config file)

use anyhow::Context;
use cvinfer_rs::config::EngineConfig;
use cvinfer_rs::pipeline::workers::{CollectSink, MapWorker, SequenceSource};
use cvinfer_rs::pipeline::{
    Node, NodeHandle, NodeOptions, Payload, PipelineEvent, PipelineGraph, Signal, SignalKind,
    WorkerError,
};
use std::time::{Duration, Instant};

fn increment(signal: Signal) -> Result<Signal, WorkerError> {
    let value = signal.as_i64().ok_or(WorkerError::TagMismatch {
        expected: SignalKind::Int64,
        found: signal.kind(),
    })?;
    Ok(signal.derive(Payload::Int64(value + 1)))
}

fn main() -> anyhow::Result<()> {
    let config = match std::env::args_os().nth(1) {
        Some(path) => EngineConfig::load(&path)
            .with_context(|| format!("loading config from {:?}", path))?,
        None => EngineConfig::load_or_default(),
    };
    let _log_guard = cvinfer_rs::logging::init(&config.logging).context("initializing logging")?;

    tracing::info!("Starting cvinfer-rs demo");

    let options = NodeOptions::from(&config);
    let demo = &config.demo;

    let mut nodes: Vec<NodeHandle> = Vec::with_capacity(demo.stages + 2);
    nodes.push(
        Node::builder("source")
            .outputs(1)
            .options(options.clone())
            .build(
                SequenceSource::counter(demo.frames)
                    .with_interval(Duration::from_millis(demo.frame_interval_ms)),
            ),
    );
    for i in 0..demo.stages {
        nodes.push(
            Node::builder(format!("increment-{}", i))
                .inputs(1)
                .outputs(1)
                .options(options.clone())
                .build(MapWorker::new(increment)),
        );
    }
    let sink = CollectSink::new().with_limit(16);
    let collected = sink.buffer();
    nodes.push(
        Node::builder("sink")
            .inputs(1)
            .options(options.clone())
            .build(sink),
    );

    let mut graph = PipelineGraph::new("demo");
    graph.bind_all(nodes).context("binding demo pipeline")?;

    let (done_tx, done_rx) = crossbeam_channel::bounded::<String>(1);
    graph.register_callback(PipelineEvent::FirstFrameDone, |node| {
        tracing::info!("First frame reached '{}'", node);
    });
    graph.register_callback(PipelineEvent::AllFrameDone, move |node| {
        let _ = done_tx.try_send(node.to_string());
    });

    let started = Instant::now();
    graph.start().context("starting demo pipeline")?;

    match done_rx.recv_timeout(Duration::from_secs(demo.max_run_secs)) {
        Ok(node) => tracing::info!("'{}' finished its stream", node),
        Err(_) => tracing::warn!("Demo timed out after {}s", demo.max_run_secs),
    }

    // Give downstream stages time to drain what the source already emitted.
    let sink_id = graph.nodes().len() - 1;
    let drain_deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < drain_deadline {
        let emitted = graph.stats()[0].emitted;
        if graph.stats()[sink_id].completed >= emitted {
            break;
        }
        std::thread::sleep(options.poll_interval);
    }

    let stop_result = graph.stop();
    let elapsed = started.elapsed();

    for stats in graph.stats() {
        println!(
            "{:<14} completed={:<8} emitted={:<8} dropped={:<4} avg={:?} max={:?}",
            stats.name,
            stats.completed,
            stats.emitted,
            stats.overflow_drops + stats.arity_drops + stats.recoverable_errors,
            stats.avg_worker_time,
            stats.max_worker_time,
        );
    }
    if let Some(last) = collected.port(0).last() {
        println!(
            "last frame #{} value={:?} latency={:?}",
            last.frame_index(),
            last.as_i64(),
            last.latency()
        );
    }
    println!("ran for {:?}", elapsed);

    stop_result.context("stopping demo pipeline")?;
    tracing::info!("Shutting down...");
    Ok(())
}
