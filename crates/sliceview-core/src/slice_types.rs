// crates/sliceview-core/src/slice_types.rs
//
// Types that flow across the channel between sliceview-media and consumers.
// One SliceRecord per demuxed packet; descriptors are built once per opened
// file and never change afterwards.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Sentinel for an unknown timestamp or duration — mirrors AV_NOPTS_VALUE.
pub const NO_TIMESTAMP: i64 = i64::MIN;

/// What kind of elementary stream a packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    Data,
    Unknown,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
            StreamKind::Subtitle => "subtitle",
            StreamKind::Data => "data",
            StreamKind::Unknown => "unknown",
        }
    }
}

/// One demuxed packet. Created by the parser worker, read-only downstream.
///
/// `pts`, `dts` and `duration` are in the stream's time base; `pos` is the
/// byte offset in the container. Any of them may be [`NO_TIMESTAMP`] (or a
/// negative `pos`) when the container doesn't know the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceRecord {
    pub stream_index: usize,
    pub stream_kind:  StreamKind,
    pub pts:          i64,
    pub dts:          i64,
    pub duration:     i64,
    pub pos:          i64,
    pub size:         usize,
    pub is_key_frame: bool,
}

impl SliceRecord {
    pub fn has_pts(&self) -> bool {
        self.pts != NO_TIMESTAMP
    }

    pub fn has_dts(&self) -> bool {
        self.dts != NO_TIMESTAMP
    }
}

/// Codec/format metadata for one video stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoStreamInfo {
    pub stream_index:        usize,
    pub codec_id:            String,
    pub codec_tag:           u32,
    /// Pixel format name, e.g. "yuv420p".
    pub format:              String,
    pub bit_rate:            i64,
    pub profile:             String,
    pub width:               u32,
    pub height:              u32,
    /// Sample aspect ratio as "num:den".
    pub sample_aspect_ratio: String,
    pub frame_rate:          f64,
    pub color_range:         String,
    pub color_space:         String,
}

/// Codec/format metadata for one audio stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioStreamInfo {
    pub stream_index:    usize,
    pub codec_id:        String,
    pub codec_tag:       u32,
    /// Sample format name, e.g. "s16" or "fltp".
    pub format:          String,
    pub bit_rate:        i64,
    pub sample_rate:     i32,
    pub channels:        i32,
    pub channel_layout:  String,
    pub bits_per_sample: i32,
}

/// Per-stream metadata, queried by index from an open container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamDescriptor {
    Video(VideoStreamInfo),
    Audio(AudioStreamInfo),
}

impl StreamDescriptor {
    pub fn stream_index(&self) -> usize {
        match self {
            StreamDescriptor::Video(v) => v.stream_index,
            StreamDescriptor::Audio(a) => a.stream_index,
        }
    }
}

/// Events sent from the parsing pipeline threads to the consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScanEvent {
    FileOpened { path: PathBuf },
    FileClosed,
    StreamsInfo {
        video: Vec<VideoStreamInfo>,
        audio: Vec<AudioStreamInfo>,
    },
    /// A batch of records in demux order, forwarded by the dispatcher.
    SlicesBatch { slices: Vec<SliceRecord> },
    /// Scan progress in percent, non-decreasing within one scan.
    Progress { percent: u8 },
    /// The scan reached end-of-stream. Exactly once per completed scan.
    ParsingFinished,
    /// The dispatcher drained the queue dry.
    ProcessingFinished,
    Error { msg: String },
}
