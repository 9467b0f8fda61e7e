//! Poller → queue → drainer pipeline with coordinated shutdown.
//!
//! # Architecture
//!
//! ```text
//!  [PacketSource] ──poll──► Poller thread ──push──► PacketQueue ──pop──► Drainer ──► [PublishSink]
//!                               ▲                                           │
//!                     poller token (Coordinator)                 interrupt token (Ctrl-C)
//! ```
//!
//! - The **poller** runs on its own thread and is the only owner of the
//!   source.
//! - The **drainer** runs on the caller's thread and is the only owner of
//!   the sink.
//! - The **queue** is the single piece of shared state.
//! - The **coordinator** stops the poller once the drainer is interrupted,
//!   publishes whatever is still queued, then disconnects the sink.
//!
//! Publishing is at-most-once: a failed publish is counted, not retried.

pub mod coordinator;
pub mod drainer;
pub mod poller;
pub mod queue;
pub mod shutdown;

pub use coordinator::ShutdownCoordinator;
pub use drainer::Drainer;
pub use poller::{run_poller, spawn_poller, PollerHandle};
pub use queue::{PacketQueue, PushError, QueueStats};
pub use shutdown::{ShutdownToken, ShutdownTrigger};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::sink::PublishSink;
use crate::source::PacketSource;
use crate::types::{DrainerStats, PipelineState, PollerReport};
use std::fmt;
use std::sync::Arc;

/// Outcome of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    /// Always [`PipelineState::Stopped`] once `run` returns
    pub state: PipelineState,
    /// `None` if the poller missed its join timeout or panicked
    pub poller: Option<PollerReport>,
    pub drainer: DrainerStats,
    pub queue: QueueStats,
    /// Batches published by the final drain
    pub drained_batches: usize,
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} published, {} failed, {} dropped, {} drained at shutdown",
            self.state,
            self.drainer.published,
            self.drainer.failed,
            self.queue.dropped,
            self.drained_batches
        )
    }
}

/// A configured source/sink pair ready to run
pub struct Pipeline<S, K> {
    config: PipelineConfig,
    topic: String,
    source: S,
    sink: K,
}

impl<S, K> Pipeline<S, K>
where
    S: PacketSource + 'static,
    K: PublishSink,
{
    pub fn new(config: PipelineConfig, topic: impl Into<String>, source: S, sink: K) -> Self {
        Self {
            config,
            topic: topic.into(),
            source,
            sink,
        }
    }

    /// Connect, run until `interrupt` fires, then drain and disconnect
    ///
    /// Fails only if the sink cannot connect within the connect timeout
    /// or the poller thread cannot be spawned; in both cases no packet has
    /// been read.
    pub fn run(self, interrupt: &ShutdownToken) -> Result<PipelineReport> {
        let Self {
            config,
            topic,
            source,
            sink,
        } = self;

        let queue = Arc::new(PacketQueue::new(config.queue_capacity));
        let mut drainer = Drainer::new(sink, topic);
        drainer.wait_for_connection(config.connect_timeout(), interrupt)?;

        let (poller_trigger, poller_token) = shutdown::channel();
        let poller = match spawn_poller(
            source,
            Arc::clone(&queue),
            poller_token,
            config.poll_interval(),
            config.push_timeout(),
        ) {
            Ok(poller) => poller,
            Err(e) => {
                if let Err(disconnect_err) = drainer.sink_mut().disconnect() {
                    tracing::debug!("Disconnect after spawn failure: {}", disconnect_err);
                }
                return Err(e);
            }
        };
        let coordinator = ShutdownCoordinator::new(poller_trigger, poller);

        tracing::info!(
            capacity = queue.capacity(),
            poll_interval_ms = config.poll_interval_ms,
            publish_delay_ms = config.publish_delay_ms,
            "Pipeline running"
        );
        drainer.run(
            &queue,
            interrupt,
            config.pop_timeout(),
            config.publish_delay(),
        );

        let report = coordinator.shutdown(
            &queue,
            &mut drainer,
            config.poller_join_timeout(),
            config.flush_timeout(),
        );
        tracing::info!("{}", report);
        Ok(report)
    }
}
