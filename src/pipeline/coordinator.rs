//! Shutdown coordinator
//!
//! Owns the poller's shutdown trigger and thread handle. When the operator
//! interrupts the drainer loop, [`ShutdownCoordinator::shutdown`] walks the
//! pipeline through `Running -> Draining -> Stopped`:
//!
//! 1. fire the poller token and wait (bounded) for the thread to exit,
//! 2. close the queue, so a poller that outlived the wait cannot enqueue
//!    behind the final drain (its late batch is counted as dropped),
//! 3. take every batch still queued and publish it through the drainer,
//!    in FIFO order,
//! 4. flush the sink and disconnect it.
//!
//! `shutdown` consumes the coordinator, so the sequence runs once.

use crate::pipeline::drainer::Drainer;
use crate::pipeline::poller::PollerHandle;
use crate::pipeline::queue::PacketQueue;
use crate::pipeline::shutdown::ShutdownTrigger;
use crate::pipeline::PipelineReport;
use crate::sink::PublishSink;
use crate::types::PipelineState;
use std::time::Duration;

/// Drives the final drain once the pipeline is interrupted
#[derive(Debug)]
pub struct ShutdownCoordinator {
    state: PipelineState,
    poller_trigger: ShutdownTrigger,
    poller: Option<PollerHandle>,
}

impl ShutdownCoordinator {
    pub fn new(poller_trigger: ShutdownTrigger, poller: PollerHandle) -> Self {
        Self {
            state: PipelineState::Running,
            poller_trigger,
            poller: Some(poller),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal pipeline transition {} -> {}",
            self.state,
            next
        );
        tracing::info!(from = %self.state, to = %next, "Pipeline state changed");
        self.state = next;
    }

    /// Stop the poller, publish everything still queued, then disconnect
    pub fn shutdown<K: PublishSink>(
        mut self,
        queue: &PacketQueue,
        drainer: &mut Drainer<K>,
        poller_join_timeout: Duration,
        flush_timeout: Duration,
    ) -> PipelineReport {
        self.transition(PipelineState::Draining);

        self.poller_trigger.trigger();
        let poller = self
            .poller
            .take()
            .and_then(|handle| handle.join_timeout(poller_join_timeout));

        queue.close();
        let batches = queue.drain_all();
        let drained_batches = batches.len();
        if drained_batches > 0 {
            tracing::info!(batches = drained_batches, "Publishing queued batches");
        }
        for batch in batches {
            drainer.forward(batch);
        }

        let sink = drainer.sink_mut();
        if let Err(e) = sink.flush(flush_timeout) {
            tracing::warn!("Sink flush incomplete: {}", e);
        }
        if let Err(e) = sink.disconnect() {
            tracing::warn!("Sink disconnect failed: {}", e);
        }
        self.transition(PipelineState::Stopped);

        PipelineReport {
            state: self.state,
            poller,
            drainer: drainer.stats(),
            queue: queue.stats(),
            drained_batches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{poller, shutdown};
    use crate::sink::{MemorySink, SinkEvent};
    use crate::source::{MockSource, MockStep};
    use crate::types::{Batch, Packet};
    use std::sync::Arc;

    fn idle_coordinator(queue: &Arc<PacketQueue>) -> ShutdownCoordinator {
        let (trigger, token) = shutdown::channel();
        let handle = poller::spawn_poller(
            MockSource::synthetic(0),
            Arc::clone(queue),
            token,
            Duration::from_millis(5),
            Duration::from_millis(5),
        )
        .unwrap();
        ShutdownCoordinator::new(trigger, handle)
    }

    #[test]
    fn test_queued_batches_are_published_before_disconnect() {
        let queue = Arc::new(PacketQueue::new(8));
        let coordinator = idle_coordinator(&queue);
        assert_eq!(coordinator.state(), PipelineState::Running);

        let (_interrupt, token) = shutdown::channel();
        let sink = MemorySink::new();
        let handle = sink.handle();
        let mut drainer = Drainer::new(sink, "t");
        drainer
            .wait_for_connection(Duration::from_secs(1), &token)
            .unwrap();

        for texts in [vec!["A", "B"], vec!["C"]] {
            queue.try_push(Batch::from_texts(texts).unwrap()).unwrap();
        }

        let report = coordinator.shutdown(
            &queue,
            &mut drainer,
            Duration::from_secs(2),
            Duration::from_secs(1),
        );

        assert_eq!(report.state, PipelineState::Stopped);
        assert_eq!(report.drained_batches, 2);
        assert!(report.poller.is_some());
        assert!(queue.is_empty());

        let events = handle.events();
        let publish = |p: &str| SinkEvent::Publish {
            topic: "t".to_string(),
            payload: p.to_string(),
        };
        assert_eq!(
            events,
            vec![
                SinkEvent::Connect,
                publish("A B"),
                publish("C"),
                SinkEvent::Flush,
                SinkEvent::Disconnect,
            ]
        );
    }

    #[test]
    fn test_failed_drain_publish_does_not_stop_shutdown() {
        let queue = Arc::new(PacketQueue::new(8));
        let coordinator = idle_coordinator(&queue);

        let (_interrupt, token) = shutdown::channel();
        let sink = MemorySink::new();
        let handle = sink.handle();
        handle.fail_publish(1);
        let mut drainer = Drainer::new(sink, "t");
        drainer
            .wait_for_connection(Duration::from_secs(1), &token)
            .unwrap();

        queue.try_push(Batch::from_texts(["x"]).unwrap()).unwrap();
        queue.try_push(Batch::from_texts(["y"]).unwrap()).unwrap();

        let report = coordinator.shutdown(
            &queue,
            &mut drainer,
            Duration::from_secs(2),
            Duration::from_secs(1),
        );
        assert_eq!(report.drainer.failed, 1);
        assert_eq!(report.drainer.published, 1);
        assert_eq!(handle.published_payloads(), vec!["y"]);
        assert_eq!(handle.events().last(), Some(&SinkEvent::Disconnect));
    }

    #[test]
    fn test_late_push_from_stuck_poller_is_dropped() {
        let queue = Arc::new(PacketQueue::new(8));
        let (trigger, poller_token) = shutdown::channel();
        let source = MockSource::scripted(vec![MockStep::Delayed(
            Duration::from_millis(150),
            vec![Packet::from("late")],
        )]);
        let polls = source.poll_counter();
        let handle = poller::spawn_poller(
            source,
            Arc::clone(&queue),
            poller_token,
            Duration::from_millis(1),
            Duration::from_millis(5),
        )
        .unwrap();
        let coordinator = ShutdownCoordinator::new(trigger, handle);

        let (_interrupt, token) = shutdown::channel();
        let sink = MemorySink::new();
        let sink_handle = sink.handle();
        let mut drainer = Drainer::new(sink, "t");
        drainer
            .wait_for_connection(Duration::from_secs(1), &token)
            .unwrap();

        // Let the poller enter the slow poll before shutting down.
        while polls.load(std::sync::atomic::Ordering::SeqCst) == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        let report = coordinator.shutdown(
            &queue,
            &mut drainer,
            Duration::from_millis(10),
            Duration::from_secs(1),
        );
        assert!(report.poller.is_none());
        assert_eq!(report.drained_batches, 0);

        // The poll completes after the drain and must not leave a batch behind.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while queue.stats().dropped == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(queue.stats().dropped, 1);
        assert_eq!(queue.stats().pushed, 0);
        assert!(queue.is_empty());
        assert!(sink_handle.published_payloads().is_empty());
    }
}
