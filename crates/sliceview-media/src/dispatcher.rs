// crates/sliceview-media/src/dispatcher.rs
//
// BatchDispatcher: the consumer side of the pipeline. Drains the queue on
// its own thread, re-groups records into batches of `batch_size`, and
// forwards each batch over the event channel. It performs no I/O and cannot
// fail — errors only ever originate upstream.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;

use sliceview_core::slice_types::ScanEvent;

use crate::batch_queue::BatchQueue;
use crate::parser::send_or_stop;

/// Records forwarded per drain.
pub const DEFAULT_BATCH_SIZE: usize = 50;

pub struct BatchDispatcher {
    queue:      Arc<BatchQueue>,
    /// Shared with the manager; re-read before every drain, so a change
    /// applies from the very next batch on.
    batch_size: Arc<AtomicUsize>,
    events:     Sender<ScanEvent>,
    stop:       Arc<AtomicBool>,
}

impl BatchDispatcher {
    pub fn new(
        queue: Arc<BatchQueue>,
        batch_size: Arc<AtomicUsize>,
        events: Sender<ScanEvent>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self { queue, batch_size, events, stop }
    }

    /// The drain loop. Blocks for records first and loads the batch size
    /// only after waking, then forwards one batch per iteration. Exits on
    /// stop-with-empty-queue, on a stop request, or when the event channel
    /// is disconnected (consumer gone).
    ///
    /// A queue that finished naturally gets `ParsingFinished` once the last
    /// batch is out, then `ProcessingFinished`; a cancelled scan ends the
    /// loop silently.
    pub fn run(self) {
        while self.queue.wait_for_records() {
            let max = self.batch_size.load(Ordering::Relaxed).max(1);
            let batch = self.queue.dequeue_up_to(max);
            if batch.is_empty() {
                break;
            }
            if !send_or_stop(&self.events, &self.stop, ScanEvent::SlicesBatch { slices: batch }) {
                eprintln!("[slices] dispatcher stopped with batches pending");
                return;
            }
        }

        if self.queue.is_finished() {
            send_or_stop(&self.events, &self.stop, ScanEvent::ParsingFinished);
            send_or_stop(&self.events, &self.stop, ScanEvent::ProcessingFinished);
        }
        eprintln!("[slices] dispatcher finished");
    }
}
