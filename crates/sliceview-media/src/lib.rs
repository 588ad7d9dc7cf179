// crates/sliceview-media/src/lib.rs
//
// The asynchronous media-container parsing pipeline.
// No UI dependency — communicates with consumers via channels only.
//
// Data flow:
//   FfmpegContainer ─► ParserWorker ─► BatchQueue ─► BatchDispatcher ─► rx
//
// MediaFileManager owns both worker threads and the event channel.

pub mod batch_queue;
pub mod container;
pub mod dispatcher;
pub mod manager;
pub mod parser;

// Re-export the main public API so consumer imports are simple.
pub use container::{Container, ContainerError, FfmpegContainer};
pub use manager::MediaFileManager;
pub use sliceview_core::slice_types::{
    AudioStreamInfo, ScanEvent, SliceRecord, StreamDescriptor, StreamKind, VideoStreamInfo,
};
