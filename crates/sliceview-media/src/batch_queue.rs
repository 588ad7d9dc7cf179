// crates/sliceview-media/src/batch_queue.rs
//
// BatchQueue: the only state shared between the parser (producer) and the
// dispatcher (consumer). One mutex, two condvars: `available` wakes the
// consumer, `space` wakes producers blocked on an optional depth cap.
//
// Unbounded by default — the producer never waits on the consumer.
// `with_max_depth` turns that into explicit backpressure when memory
// bounding matters.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use sliceview_core::slice_types::SliceRecord;

struct State {
    slices:   VecDeque<SliceRecord>,
    stopped:  bool,
    finished: bool,
}

pub struct BatchQueue {
    inner:     Mutex<State>,
    available: Condvar,
    space:     Condvar,
    max_depth: Option<usize>,
}

impl BatchQueue {
    /// Unbounded queue: `enqueue` never blocks.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Caps the queue at `max_depth` records; a full queue blocks the
    /// producer until the consumer drains or the queue is stopped.
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self::build(Some(max_depth.max(1)))
    }

    fn build(max_depth: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(State {
                slices:   VecDeque::new(),
                stopped:  false,
                finished: false,
            }),
            available: Condvar::new(),
            space: Condvar::new(),
            max_depth,
        }
    }

    /// Appends `batch` at the tail, preserving its internal order. Ignores
    /// empty batches. Once stopped, the batch is dropped — only records
    /// queued before the stop are delivered.
    pub fn enqueue(&self, batch: Vec<SliceRecord>) {
        if batch.is_empty() {
            return;
        }

        let mut state = self.inner.lock().unwrap();
        if let Some(cap) = self.max_depth {
            while !state.stopped && state.slices.len() >= cap {
                state = self.space.wait(state).unwrap();
            }
        }
        if state.stopped {
            return;
        }
        state.slices.extend(batch);
        self.available.notify_one();
    }

    /// Blocks until at least one record is queued or the queue has been
    /// stopped with nothing left. Returns whether records are available;
    /// `false` means no more work will ever arrive.
    pub fn wait_for_records(&self) -> bool {
        let mut state = self.inner.lock().unwrap();
        while state.slices.is_empty() && !state.stopped {
            state = self.available.wait(state).unwrap();
        }
        !state.slices.is_empty()
    }

    /// Blocks until at least one record is available or the queue has been
    /// stopped. Returns up to `max` records in FIFO order; an empty result
    /// means stopped-with-empty-queue — no more work will ever arrive.
    pub fn dequeue_up_to(&self, max: usize) -> Vec<SliceRecord> {
        let mut state = self.inner.lock().unwrap();
        while state.slices.is_empty() && !state.stopped {
            state = self.available.wait(state).unwrap();
        }

        let count = max.min(state.slices.len());
        let out: Vec<SliceRecord> = state.slices.drain(..count).collect();
        if !out.is_empty() {
            self.space.notify_one();
        }
        out
    }

    /// Discards everything queued. Wakes producers blocked on a full queue.
    pub fn clear(&self) {
        let mut state = self.inner.lock().unwrap();
        state.slices.clear();
        self.space.notify_all();
    }

    /// Monotonic: once stopped the queue drains and then only ever reports
    /// "no more work". Wakes all waiters on both sides.
    pub fn stop(&self) {
        let mut state = self.inner.lock().unwrap();
        state.stopped = true;
        self.available.notify_all();
        self.space.notify_all();
    }

    /// Like [`stop`](Self::stop), but marks the end of input as a natural
    /// completion: every record the producer ever read has been enqueued.
    pub fn finish(&self) {
        let mut state = self.inner.lock().unwrap();
        state.stopped = true;
        state.finished = true;
        self.available.notify_all();
        self.space.notify_all();
    }

    /// True only after [`finish`](Self::finish); a plain stop leaves it
    /// unset. A later stop does not clear it.
    pub fn is_finished(&self) -> bool {
        self.inner.lock().unwrap().finished
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().slices.is_empty()
    }
}

impl Default for BatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sliceview_core::slice_types::StreamKind;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn record(n: usize) -> SliceRecord {
        SliceRecord {
            stream_index: 0,
            stream_kind:  StreamKind::Video,
            pts:          n as i64,
            dts:          n as i64,
            duration:     1,
            pos:          (n * 100) as i64,
            size:         100,
            is_key_frame: false,
        }
    }

    fn records(range: std::ops::Range<usize>) -> Vec<SliceRecord> {
        range.map(record).collect()
    }

    #[test]
    fn fifo_across_enqueues_regardless_of_drain_size() {
        let queue = BatchQueue::new();
        queue.enqueue(records(0..7));
        queue.enqueue(records(7..10));
        queue.enqueue(records(10..23));
        queue.stop();

        let mut all = Vec::new();
        for drain in [1usize, 4, 9, 100] {
            all.extend(queue.dequeue_up_to(drain));
        }
        assert_eq!(all, records(0..23));
        assert!(queue.dequeue_up_to(10).is_empty());
    }

    #[test]
    fn dequeue_blocks_until_enqueue_wakes_it() {
        let queue = Arc::new(BatchQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue_up_to(10))
        };

        thread::sleep(Duration::from_millis(50));
        queue.enqueue(records(0..3));
        assert_eq!(consumer.join().unwrap(), records(0..3));
    }

    #[test]
    fn stop_wakes_blocked_consumer_with_empty_result() {
        let queue = Arc::new(BatchQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue_up_to(10))
        };

        thread::sleep(Duration::from_millis(50));
        queue.stop();
        assert!(consumer.join().unwrap().is_empty());
    }

    #[test]
    fn stopped_queue_still_drains_leftovers_in_order() {
        let queue = BatchQueue::new();
        queue.enqueue(records(0..5));
        queue.stop();
        // Enqueued after stop: dropped.
        queue.enqueue(records(5..8));

        assert_eq!(queue.dequeue_up_to(3), records(0..3));
        assert_eq!(queue.dequeue_up_to(3), records(3..5));
        assert!(queue.dequeue_up_to(3).is_empty());
    }

    #[test]
    fn clear_discards_queued_records() {
        let queue = BatchQueue::new();
        queue.enqueue(records(0..50));
        assert_eq!(queue.len(), 50);
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn max_depth_blocks_producer_until_drained() {
        let queue = Arc::new(BatchQueue::with_max_depth(5));
        queue.enqueue(records(0..5));

        let done = Arc::new(AtomicBool::new(false));
        let producer = {
            let queue = Arc::clone(&queue);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                queue.enqueue(records(5..7));
                done.store(true, Ordering::Relaxed);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::Relaxed), "producer should be blocked on the cap");

        assert_eq!(queue.dequeue_up_to(5), records(0..5));
        producer.join().unwrap();
        assert!(done.load(Ordering::Relaxed));
        assert_eq!(queue.dequeue_up_to(5), records(5..7));
    }

    #[test]
    fn finish_marks_natural_completion_and_stop_does_not() {
        let finished = BatchQueue::new();
        finished.enqueue(records(0..3));
        finished.finish();
        assert!(finished.is_finished());
        assert_eq!(finished.dequeue_up_to(10), records(0..3));
        assert!(!finished.wait_for_records());
        // A later stop (the reap path) must not demote a finished queue.
        finished.stop();
        assert!(finished.is_finished());

        let cancelled = BatchQueue::new();
        cancelled.stop();
        assert!(!cancelled.is_finished());
        assert!(!cancelled.wait_for_records());
    }

    #[test]
    fn stop_unblocks_capped_producer() {
        let queue = Arc::new(BatchQueue::with_max_depth(2));
        queue.enqueue(records(0..2));

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.enqueue(records(2..4)))
        };

        thread::sleep(Duration::from_millis(50));
        queue.stop();
        producer.join().unwrap();

        // The blocked batch was dropped at stop; only pre-stop records drain.
        assert_eq!(queue.dequeue_up_to(10), records(0..2));
        assert!(queue.dequeue_up_to(10).is_empty());
    }
}
