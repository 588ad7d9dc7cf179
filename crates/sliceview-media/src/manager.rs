// crates/sliceview-media/src/manager.rs
//
// MediaFileManager: owns the open file, the event channel, and the per-scan
// worker pair (parser + dispatcher). All public API that consumers call
// lives here.
//
// Lifecycle: open_file -> start_parsing -> (scan runs) -> stop_parsing or
// natural finish -> close_file. Re-opening or closing mid-scan stops both
// workers and waits for them to reach a terminal state before discarding.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{bail, Result};
use crossbeam_channel::{bounded, Receiver, Sender};

use sliceview_core::slice_types::{
    AudioStreamInfo, ScanEvent, StreamDescriptor, StreamKind, VideoStreamInfo,
};

use crate::batch_queue::BatchQueue;
use crate::container::{Container, ContainerError, FfmpegContainer};
use crate::dispatcher::{BatchDispatcher, DEFAULT_BATCH_SIZE};
use crate::parser::{ContainerOpener, ParserWorker, ScanOutcome, DEFAULT_BATCH_THRESHOLD};

type OpenFn = Arc<dyn Fn(&Path) -> Result<Box<dyn Container>, ContainerError> + Send + Sync>;

struct OpenFile {
    path:      PathBuf,
    size:      u64,
    container: Box<dyn Container>,
    video:     Vec<VideoStreamInfo>,
    audio:     Vec<AudioStreamInfo>,
}

struct ActiveScan {
    stop:       Arc<AtomicBool>,
    queue:      Arc<BatchQueue>,
    parser:     JoinHandle<ScanOutcome>,
    dispatcher: JoinHandle<()>,
}

pub struct MediaFileManager {
    /// Events from the pipeline threads: batches, progress, lifecycle.
    pub rx: Receiver<ScanEvent>,
    tx:     Sender<ScanEvent>,

    open:            OpenFn,
    current:         Option<OpenFile>,
    scan:            Option<ActiveScan>,
    batch_size:      Arc<AtomicUsize>,
    batch_threshold: usize,
}

impl MediaFileManager {
    pub fn new() -> Self {
        Self::with_opener(Arc::new(|path: &Path| {
            FfmpegContainer::open(path).map(|c| Box::new(c) as Box<dyn Container>)
        }))
    }

    /// Seam for tests: inject a container opener instead of ffmpeg.
    pub(crate) fn with_opener(open: OpenFn) -> Self {
        let (tx, rx) = bounded(512);
        Self {
            rx,
            tx,
            open,
            current: None,
            scan: None,
            batch_size: Arc::new(AtomicUsize::new(DEFAULT_BATCH_SIZE)),
            batch_threshold: DEFAULT_BATCH_THRESHOLD,
        }
    }

    /// Events emitted from the caller's own thread must never block: the
    /// caller is also the channel's only consumer, so a full channel here
    /// means nobody is draining and the event can only be dropped.
    fn emit(&self, event: ScanEvent) {
        if self.tx.try_send(event).is_err() {
            eprintln!("[demux] event channel full, event dropped");
        }
    }

    // ── File lifecycle ───────────────────────────────────────────────────────

    /// Opens `path` and extracts stream metadata. Emits `FileOpened` then
    /// `StreamsInfo` on success; emits `Error` once and returns the failure
    /// otherwise. Any previously open file is closed first.
    pub fn open_file(&mut self, path: &Path) -> Result<()> {
        self.close_file();

        let container = match (self.open)(path) {
            Ok(c) => c,
            Err(e) => {
                self.emit(ScanEvent::Error { msg: e.to_string() });
                return Err(e.into());
            }
        };

        let mut video = Vec::new();
        let mut audio = Vec::new();
        for index in 0..container.stream_count() {
            match container.descriptor(index) {
                Some(StreamDescriptor::Video(info)) => video.push(info),
                Some(StreamDescriptor::Audio(info)) => audio.push(info),
                None => {}
            }
        }

        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        eprintln!(
            "[demux] file opened: {} ({size} bytes, {} video / {} audio streams)",
            path.display(),
            video.len(),
            audio.len(),
        );

        self.emit(ScanEvent::FileOpened { path: path.to_path_buf() });
        self.emit(ScanEvent::StreamsInfo {
            video: video.clone(),
            audio: audio.clone(),
        });

        self.current = Some(OpenFile { path: path.to_path_buf(), size, container, video, audio });
        Ok(())
    }

    /// Stops any running scan, releases the container, emits `FileClosed`.
    /// No-op when nothing is open.
    pub fn close_file(&mut self) {
        self.stop_parsing();
        if let Some(mut file) = self.current.take() {
            file.container.close();
            eprintln!("[demux] file closed: {}", file.path.display());
            self.emit(ScanEvent::FileClosed);
        }
    }

    // ── Scan control ─────────────────────────────────────────────────────────

    /// Spawns the parser and dispatcher threads for the open file. The
    /// parser opens its own container so the metadata handle stays
    /// untouched. Any previous scan is stopped and reaped first.
    pub fn start_parsing(&mut self) -> Result<()> {
        let Some(file) = &self.current else {
            self.emit(ScanEvent::Error { msg: "no file open".into() });
            bail!("no file open");
        };
        let path = file.path.clone();

        self.stop_parsing();

        let stop = Arc::new(AtomicBool::new(false));
        let queue = Arc::new(BatchQueue::new());

        let opener: ContainerOpener = {
            let open = Arc::clone(&self.open);
            Box::new(move || open(&path))
        };
        let worker = ParserWorker::new(
            opener,
            Arc::clone(&queue),
            self.tx.clone(),
            Arc::clone(&stop),
            self.batch_threshold,
        );
        let parser = thread::spawn(move || worker.run());

        let dispatcher = BatchDispatcher::new(
            Arc::clone(&queue),
            Arc::clone(&self.batch_size),
            self.tx.clone(),
            Arc::clone(&stop),
        );
        let dispatcher = thread::spawn(move || dispatcher.run());

        self.scan = Some(ActiveScan { stop, queue, parser, dispatcher });
        Ok(())
    }

    /// Signals stop and waits for both workers to reach a terminal state.
    /// Idempotent; after a natural finish this only reaps the threads.
    /// Safe to call with a full event channel: workers give up on a blocked
    /// send once the stop flag is set, so the joins always return.
    pub fn stop_parsing(&mut self) {
        if let Some(scan) = self.scan.take() {
            scan.stop.store(true, Ordering::Relaxed);
            scan.queue.stop();
            match scan.parser.join() {
                Ok(outcome) => eprintln!("[demux] scan ended: {outcome:?}"),
                Err(_) => eprintln!("[demux] parser thread panicked"),
            }
            let _ = scan.dispatcher.join();
            scan.queue.clear();
        }
    }

    pub fn is_parsing(&self) -> bool {
        self.scan.as_ref().is_some_and(|s| !s.parser.is_finished())
    }

    /// Sets the dispatcher's forwarding batch size. Applies to future
    /// drains only; `n == 0` is ignored.
    pub fn set_batch_size(&self, n: usize) {
        if n > 0 {
            self.batch_size.store(n, Ordering::Relaxed);
        }
    }

    /// Sets the parser's accumulation threshold for future scans.
    pub fn set_batch_threshold(&mut self, n: usize) {
        if n > 0 {
            self.batch_threshold = n;
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn current_file_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|f| f.path.as_path())
    }

    pub fn file_size(&self) -> u64 {
        self.current.as_ref().map_or(0, |f| f.size)
    }

    pub fn video_streams(&self) -> &[VideoStreamInfo] {
        self.current.as_ref().map_or(&[], |f| &f.video)
    }

    pub fn audio_streams(&self) -> &[AudioStreamInfo] {
        self.current.as_ref().map_or(&[], |f| &f.audio)
    }

    pub fn stream_count(&self) -> usize {
        self.current.as_ref().map_or(0, |f| f.container.stream_count())
    }

    pub fn stream_kind(&self, index: usize) -> StreamKind {
        self.current
            .as_ref()
            .map_or(StreamKind::Unknown, |f| f.container.stream_kind(index))
    }

    pub fn descriptor(&self, index: usize) -> Option<StreamDescriptor> {
        self.current.as_ref().and_then(|f| f.container.descriptor(index))
    }
}

impl Default for MediaFileManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MediaFileManager {
    fn drop(&mut self) {
        // No worker outlives the manager.
        self.close_file();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::testing::{make_packets, FakeContainer};
    use sliceview_core::slice_types::SliceRecord;
    use std::time::Duration;

    const KINDS: [StreamKind; 4] =
        [StreamKind::Video, StreamKind::Video, StreamKind::Video, StreamKind::Audio];

    /// Opener producing a fresh scripted container per call — the manager
    /// opens once for metadata and once more per scan.
    fn fake_opener(kinds: Vec<StreamKind>, count: usize, duration: i64) -> OpenFn {
        Arc::new(move |_path: &Path| {
            let packets = make_packets(count, &kinds, duration);
            Ok(Box::new(FakeContainer::new(kinds.clone(), packets, duration))
                as Box<dyn Container>)
        })
    }

    fn collect_until_finished(manager: &MediaFileManager) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        loop {
            let ev = manager
                .rx
                .recv_timeout(Duration::from_secs(5))
                .expect("pipeline stalled");
            let done = matches!(ev, ScanEvent::ParsingFinished);
            events.push(ev);
            if done {
                return events;
            }
        }
    }

    fn batches(events: &[ScanEvent]) -> Vec<Vec<SliceRecord>> {
        events
            .iter()
            .filter_map(|e| match e {
                ScanEvent::SlicesBatch { slices } => Some(slices.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn scenario_a_full_scan_delivers_everything_in_order() {
        // 3 video + 1 audio streams, 250 packets, threshold 100.
        let mut manager = MediaFileManager::with_opener(fake_opener(KINDS.to_vec(), 250, 250_000));
        manager.open_file(Path::new("clip.mkv")).unwrap();

        assert_eq!(manager.current_file_path(), Some(Path::new("clip.mkv")));
        assert_eq!(manager.stream_count(), 4);
        assert_eq!(manager.stream_kind(3), StreamKind::Audio);
        assert_eq!(manager.video_streams().len(), 3);
        assert_eq!(manager.audio_streams().len(), 1);
        assert!(manager.descriptor(0).is_some());

        assert!(matches!(
            manager.rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            ScanEvent::FileOpened { .. }
        ));
        match manager.rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            ScanEvent::StreamsInfo { video, audio } => {
                assert_eq!(video.len(), 3);
                assert_eq!(audio.len(), 1);
            }
            other => panic!("expected StreamsInfo, got {other:?}"),
        }

        manager.start_parsing().unwrap();
        let mut events = collect_until_finished(&manager);
        manager.stop_parsing(); // reap; must not emit anything further
        while let Ok(ev) = manager.rx.try_recv() {
            events.push(ev);
        }

        // Dispatcher re-groups the 100/100/50 producer batches into 50s.
        let delivered = batches(&events);
        assert_eq!(delivered.iter().map(Vec::len).sum::<usize>(), 250);
        assert!(delivered.iter().all(|b| b.len() <= 50));
        let flat: Vec<SliceRecord> = delivered.into_iter().flatten().collect();
        let expected = make_packets(250, &KINDS, 250_000);
        assert_eq!(flat, expected);

        let percents: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                ScanEvent::Progress { percent } => Some(*percent),
                _ => None,
            })
            .collect();
        assert!(percents.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(percents.last().copied(), Some(100));

        assert_eq!(
            events.iter().filter(|e| matches!(e, ScanEvent::ParsingFinished)).count(),
            1
        );
        assert!(events.iter().any(|e| matches!(e, ScanEvent::ProcessingFinished)));
        assert!(!events.iter().any(|e| matches!(e, ScanEvent::Error { .. })));
    }

    #[test]
    fn scenario_b_missing_file_fails_without_file_opened() {
        let mut manager = MediaFileManager::with_opener(Arc::new(|path: &Path| {
            Err(ContainerError::NotFound(path.to_path_buf()))
        }));

        assert!(manager.open_file(Path::new("/missing/clip.mkv")).is_err());
        assert!(!manager.is_parsing());

        let mut saw_error = false;
        while let Ok(ev) = manager.rx.try_recv() {
            match ev {
                ScanEvent::Error { msg } => {
                    assert!(msg.contains("does not exist"), "unexpected message: {msg}");
                    saw_error = true;
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert!(saw_error);
    }

    #[test]
    fn scenario_c_no_streams_fails_without_metadata_event() {
        let mut manager =
            MediaFileManager::with_opener(Arc::new(|_: &Path| Err(ContainerError::NoStreams)));

        assert!(manager.open_file(Path::new("data-only.bin")).is_err());

        let mut saw_error = false;
        while let Ok(ev) = manager.rx.try_recv() {
            match ev {
                ScanEvent::Error { .. } => saw_error = true,
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert!(saw_error);
    }

    #[test]
    fn scenario_d_immediate_stop_delivers_no_batches() {
        // The scan's opener parks long enough for the stop request to land
        // before the first packet is read.
        let opener: OpenFn = Arc::new(move |_: &Path| {
            std::thread::sleep(Duration::from_millis(100));
            let packets = make_packets(1000, &[StreamKind::Video], 1_000_000);
            Ok(Box::new(FakeContainer::new(
                vec![StreamKind::Video],
                packets,
                1_000_000,
            )) as Box<dyn Container>)
        });

        let mut manager = MediaFileManager::with_opener(opener);
        manager.open_file(Path::new("clip.mkv")).unwrap();
        manager.start_parsing().unwrap();
        assert!(manager.is_parsing());
        manager.stop_parsing();
        assert!(!manager.is_parsing());

        while let Ok(ev) = manager.rx.try_recv() {
            assert!(
                !matches!(ev, ScanEvent::SlicesBatch { .. } | ScanEvent::ParsingFinished),
                "unexpected event {ev:?}"
            );
        }
    }

    #[test]
    fn stop_parsing_returns_when_events_are_not_drained() {
        // Big enough that the bounded event channel fills while nobody
        // reads rx; both workers end up parked in a blocked send.
        let mut manager = MediaFileManager::with_opener(fake_opener(
            vec![StreamKind::Video],
            100_000,
            100_000_000,
        ));
        manager.open_file(Path::new("clip.mkv")).unwrap();
        manager.start_parsing().unwrap();

        thread::sleep(Duration::from_millis(200));
        assert!(manager.rx.is_full());

        let (done_tx, done_rx) = bounded(1);
        thread::spawn(move || {
            manager.stop_parsing();
            drop(manager); // close_file with a full channel must not block either
            let _ = done_tx.send(());
        });
        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("stop_parsing wedged on the backed-up event channel");
    }

    #[test]
    fn stop_after_finish_is_a_no_op() {
        let mut manager = MediaFileManager::with_opener(fake_opener(KINDS.to_vec(), 30, 30_000));
        manager.open_file(Path::new("clip.mkv")).unwrap();
        manager.start_parsing().unwrap();

        let mut events = collect_until_finished(&manager);
        manager.stop_parsing();
        manager.stop_parsing();
        while let Ok(ev) = manager.rx.try_recv() {
            events.push(ev);
        }

        assert_eq!(
            events.iter().filter(|e| matches!(e, ScanEvent::ParsingFinished)).count(),
            1
        );
        assert!(!events.iter().any(|e| matches!(e, ScanEvent::Error { .. })));
    }

    #[test]
    fn start_parsing_without_open_file_errors() {
        let mut manager =
            MediaFileManager::with_opener(Arc::new(|_: &Path| Err(ContainerError::NoStreams)));
        assert!(manager.start_parsing().is_err());
        assert!(matches!(
            manager.rx.try_recv().unwrap(),
            ScanEvent::Error { .. }
        ));
    }

    #[test]
    fn reopen_mid_scan_restarts_cleanly() {
        let mut manager =
            MediaFileManager::with_opener(fake_opener(KINDS.to_vec(), 5_000, 5_000_000));
        manager.open_file(Path::new("first.mkv")).unwrap();
        manager.start_parsing().unwrap();

        // Re-open while the first scan may still be running. open_file joins
        // the old workers first, so every first-scan event (and the
        // FileClosed for first.mkv) precedes the second FileOpened.
        manager.open_file(Path::new("second.mkv")).unwrap();
        assert!(!manager.is_parsing());
        assert_eq!(manager.current_file_path(), Some(Path::new("second.mkv")));

        // Skip the first file's backlog up to the second FileOpened.
        loop {
            match manager.rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                ScanEvent::FileOpened { path } if path == Path::new("second.mkv") => break,
                _ => {}
            }
        }

        manager.start_parsing().unwrap();
        let events = collect_until_finished(&manager);
        assert!(events.iter().any(|e| matches!(e, ScanEvent::ParsingFinished)));

        manager.close_file();
        let closed = manager
            .rx
            .try_iter()
            .filter(|e| matches!(e, ScanEvent::FileClosed))
            .count();
        assert_eq!(closed, 1);
    }

    #[test]
    fn runtime_batch_size_shapes_forwarded_batches() {
        let mut manager =
            MediaFileManager::with_opener(fake_opener(KINDS.to_vec(), 200, 200_000));
        manager.open_file(Path::new("clip.mkv")).unwrap();
        manager.set_batch_size(25);
        manager.set_batch_size(0); // ignored
        manager.start_parsing().unwrap();

        let events = collect_until_finished(&manager);
        manager.stop_parsing();
        let delivered = batches(&events);
        assert!(!delivered.is_empty());
        assert!(delivered.iter().all(|b| b.len() <= 25));
    }
}
