//! Poller: transport source → queue
//!
//! The poller owns the [`PacketSource`] and runs on its own thread. Each
//! tick it sleeps for the poll interval (waking early if the shutdown
//! token fires), polls the source once and pushes any non-empty batch onto
//! the queue. An unavailable source and a failed read both count as an
//! empty tick. The token is checked again after every tick.

use crate::error::{BridgeError, Result, ResultExt};
use crate::pipeline::queue::{PacketQueue, PushError};
use crate::pipeline::shutdown::ShutdownToken;
use crate::source::PacketSource;
use crate::types::{Batch, PollerReport};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Name of the poller thread
pub const POLLER_THREAD_NAME: &str = "packet-poller";

/// Poll `source` every `interval` until `token` is cancelled
///
/// A full queue blocks the push for at most `push_timeout`, after which
/// the batch is dropped and counted. A closed queue drops the batch and
/// stops the poller. The source is closed on exit.
pub fn run_poller<S: PacketSource>(
    mut source: S,
    queue: &PacketQueue,
    token: &ShutdownToken,
    interval: Duration,
    push_timeout: Duration,
) -> PollerReport {
    tracing::info!(
        source = source.name(),
        interval_ms = interval.as_millis() as u64,
        "Poller started"
    );
    let mut report = PollerReport::default();

    loop {
        if token.wait_timeout(interval) {
            break;
        }
        report.ticks += 1;

        match source.poll() {
            Ok(packets) => match Batch::new(packets) {
                Some(batch) => {
                    let packets = batch.len();
                    match queue.push(batch, push_timeout) {
                        Ok(()) => {
                            report.batches_enqueued += 1;
                            report.packets_received += packets as u64;
                            tracing::trace!(packets, queued = queue.len(), "Batch enqueued");
                        }
                        Err(e @ PushError::Full(_)) => {
                            report.batches_dropped += 1;
                            tracing::warn!(
                                capacity = queue.capacity(),
                                "{}",
                                BridgeError::from(e)
                            );
                        }
                        Err(e @ PushError::Closed(_)) => {
                            // Shutdown is already draining; nothing more can be queued.
                            report.batches_dropped += 1;
                            tracing::warn!("{}", BridgeError::from(e));
                            break;
                        }
                    }
                }
                None => report.idle_ticks += 1,
            },
            Err(e) if e.is_unavailable() => {
                report.unavailable_ticks += 1;
                tracing::debug!(source = source.name(), "{}", e);
            }
            Err(e) => {
                report.read_errors += 1;
                tracing::warn!(source = source.name(), "Poll failed: {}", e);
            }
        }

        if token.is_cancelled() {
            break;
        }
    }

    source.close();
    tracing::info!(
        ticks = report.ticks,
        batches = report.batches_enqueued,
        dropped = report.batches_dropped,
        "Poller stopped"
    );
    report
}

/// A poller running on its own thread
#[derive(Debug)]
pub struct PollerHandle {
    handle: JoinHandle<PollerReport>,
    /// Disconnects when the thread exits, including by panic
    done: Receiver<()>,
}

impl PollerHandle {
    /// Wait up to `timeout` for the thread to exit
    ///
    /// Returns `None` if it is still running (the thread is left detached)
    /// or if it panicked.
    pub fn join_timeout(self, timeout: Duration) -> Option<PollerReport> {
        match self.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Poller did not stop in time"
                );
                None
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => match self.handle.join() {
                Ok(report) => Some(report),
                Err(_) => {
                    tracing::error!("Poller thread panicked");
                    None
                }
            },
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Start [`run_poller`] on a thread named [`POLLER_THREAD_NAME`]
pub fn spawn_poller<S>(
    source: S,
    queue: Arc<PacketQueue>,
    token: ShutdownToken,
    interval: Duration,
    push_timeout: Duration,
) -> Result<PollerHandle>
where
    S: PacketSource + 'static,
{
    let (done_tx, done_rx) = bounded::<()>(1);
    let handle = std::thread::Builder::new()
        .name(POLLER_THREAD_NAME.to_string())
        .spawn(move || {
            let _done = done_tx;
            run_poller(source, &queue, &token, interval, push_timeout)
        })
        .context("Failed to spawn poller thread")?;

    Ok(PollerHandle {
        handle,
        done: done_rx,
    })
}
