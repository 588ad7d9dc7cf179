// crates/sliceview-media/src/parser.rs
//
// ParserWorker: the producer side of the pipeline. Runs a linear demux scan
// on its own thread, accumulates records into threshold-sized batches, hands
// them to the BatchQueue, and reports progress over the event channel.
//
// State machine: Idle -> Opening -> Scanning -> {Finished | Stopped | Failed}.
// The stop flag is the only cross-thread mutable state; it is checked once
// per packet iteration, so a stop request is observed within one read.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{SendTimeoutError, Sender};

use sliceview_core::slice_types::{ScanEvent, StreamKind};

use crate::batch_queue::BatchQueue;
use crate::container::{Container, ContainerError};

/// Records accumulated before a handoff to the queue.
pub const DEFAULT_BATCH_THRESHOLD: usize = 100;

/// Opens the scan's own container on the worker thread.
pub type ContainerOpener =
    Box<dyn FnOnce() -> Result<Box<dyn Container>, ContainerError> + Send>;

/// Terminal state of one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Finished,
    Stopped,
    Failed,
}

pub struct ParserWorker {
    open:            ContainerOpener,
    queue:           Arc<BatchQueue>,
    events:          Sender<ScanEvent>,
    stop:            Arc<AtomicBool>,
    batch_threshold: usize,
}

impl ParserWorker {
    pub fn new(
        open: ContainerOpener,
        queue: Arc<BatchQueue>,
        events: Sender<ScanEvent>,
        stop: Arc<AtomicBool>,
        batch_threshold: usize,
    ) -> Self {
        Self { open, queue, events, stop, batch_threshold: batch_threshold.max(1) }
    }

    /// Runs the whole scan. Always leaves the queue stopped afterwards so
    /// the dispatcher drains whatever is queued and then exits; a scan that
    /// reached end-of-stream marks the queue finished instead, which tells
    /// the dispatcher to announce completion once it has forwarded the last
    /// batch.
    pub fn run(self) -> ScanOutcome {
        let queue = Arc::clone(&self.queue);
        let outcome = self.scan();
        match outcome {
            ScanOutcome::Finished => queue.finish(),
            ScanOutcome::Stopped | ScanOutcome::Failed => queue.stop(),
        }
        outcome
    }

    fn scan(self) -> ScanOutcome {
        let Self { open, queue, events, stop, batch_threshold } = self;
        let send_event = |event: ScanEvent| send_or_stop(&events, &stop, event);

        // Opening.
        let mut container = match open() {
            Ok(c) => c,
            Err(e) => {
                eprintln!("[demux] open failed: {e}");
                send_event(ScanEvent::Error { msg: e.to_string() });
                return ScanOutcome::Failed;
            }
        };

        // Scanning.
        let total_duration = container.total_duration();
        let mut buffer = Vec::with_capacity(batch_threshold);
        let mut last_progress: i64 = -1;
        let mut slice_count: usize = 0;
        let mut tally = KindTally::default();

        eprintln!("[demux] scanning, total duration {total_duration}");

        let outcome = loop {
            // A stop request discards the partial buffer; records already
            // handed to the queue still reach the consumer.
            if stop.load(Ordering::Relaxed) {
                eprintln!("[demux] scan stopped by request after {slice_count} slices");
                break ScanOutcome::Stopped;
            }

            match container.read_next_packet() {
                Ok(Some(slice)) => {
                    slice_count += 1;
                    tally.add(slice.stream_kind);

                    // First 10 slices in full, then every 50th.
                    if slice_count <= 10 || slice_count % 50 == 0 {
                        eprintln!(
                            "[demux] slice #{slice_count}: stream {} ({}), pts {}, dts {}, {} bytes, key {}, pos {}",
                            slice.stream_index,
                            slice.stream_kind.as_str(),
                            slice.pts,
                            slice.dts,
                            slice.size,
                            slice.is_key_frame,
                            slice.pos,
                        );
                    }

                    if total_duration > 0 && slice.has_pts() && slice.pts > 0 {
                        let pct = slice
                            .pts
                            .saturating_mul(100)
                            .checked_div(total_duration)
                            .unwrap_or(0)
                            .clamp(0, 100);
                        // Emit only on increase: non-decreasing per scan even
                        // when interleaved streams report pts out of order.
                        if pct > last_progress {
                            last_progress = pct;
                            send_event(ScanEvent::Progress { percent: pct as u8 });
                        }
                    }

                    buffer.push(slice);
                    if buffer.len() >= batch_threshold {
                        queue.enqueue(std::mem::take(&mut buffer));
                        buffer.reserve(batch_threshold);
                    }
                }
                Ok(None) => {
                    if !buffer.is_empty() {
                        eprintln!("[demux] final batch of {} slices", buffer.len());
                        queue.enqueue(std::mem::take(&mut buffer));
                    }
                    if last_progress != 100 {
                        send_event(ScanEvent::Progress { percent: 100 });
                    }
                    eprintln!(
                        "[demux] scan done: {slice_count} slices ({} video / {} audio / {} other) across {} streams",
                        tally.video, tally.audio, tally.other,
                        container.stream_count(),
                    );
                    break ScanOutcome::Finished;
                }
                Err(e) => {
                    eprintln!("[demux] read failed after {slice_count} slices: {e}");
                    send_event(ScanEvent::Error { msg: e.to_string() });
                    break ScanOutcome::Failed;
                }
            }
        };

        // The handle is closed on every terminal transition.
        container.close();
        outcome
    }
}

/// Sends over the bounded event channel without wedging on a consumer that
/// stopped draining: waits in short slices and checks the stop flag between
/// them. An event that fits is always delivered, stop requested or not;
/// only a send that is actually blocked gives up, so teardown can never
/// deadlock on a full channel.
pub(crate) fn send_or_stop(
    events: &Sender<ScanEvent>,
    stop: &AtomicBool,
    event: ScanEvent,
) -> bool {
    let mut event = event;
    loop {
        match events.send_timeout(event, Duration::from_millis(20)) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(ev)) => {
                if stop.load(Ordering::Relaxed) {
                    return false;
                }
                event = ev;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

/// Local per-kind counters for the end-of-scan summary line.
#[derive(Default)]
struct KindTally {
    video: usize,
    audio: usize,
    other: usize,
}

impl KindTally {
    fn add(&mut self, kind: StreamKind) {
        match kind {
            StreamKind::Video => self.video += 1,
            StreamKind::Audio => self.audio += 1,
            _ => self.other += 1,
        }
    }
}
