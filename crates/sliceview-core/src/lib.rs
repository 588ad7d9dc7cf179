// crates/sliceview-core/src/lib.rs
//
// Plain data types that flow across the channel between sliceview-media and
// its consumers. No ffmpeg, no UI — just data.

pub mod slice_types;

// Re-export the channel-boundary types so consumer imports are simple.
pub use slice_types::{
    AudioStreamInfo, ScanEvent, SliceRecord, StreamDescriptor, StreamKind, VideoStreamInfo,
    NO_TIMESTAMP,
};
