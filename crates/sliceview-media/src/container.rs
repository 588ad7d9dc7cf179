// crates/sliceview-media/src/container.rs
//
// Container handle: owns the lifetime of an open media file and its stream
// metadata. All ffmpeg access in the workspace lives in this module; the
// rest of the pipeline only sees the Container trait and plain records.

use std::ffi::CStr;
use std::path::{Path, PathBuf};
use std::sync::Once;

use ffmpeg_the_third as ffmpeg;
use thiserror::Error;

use sliceview_core::slice_types::{
    AudioStreamInfo, SliceRecord, StreamDescriptor, StreamKind, VideoStreamInfo, NO_TIMESTAMP,
};

static FFMPEG_INIT: Once = Once::new();

fn init_ffmpeg() {
    FFMPEG_INIT.call_once(|| {
        if let Err(e) = ffmpeg::init() {
            eprintln!("[demux] ffmpeg init failed: {e}");
        }
    });
}

/// Everything that can go wrong at the container boundary.
///
/// Errors are returned as values from `open` / `read_next_packet`; no
/// partial or corrupt record is ever produced alongside one.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("file does not exist: {0}")]
    NotFound(PathBuf),
    #[error("could not open input: {0}")]
    Format(String),
    #[error("no audio or video streams found")]
    NoStreams,
    #[error("packet read failed: {0}")]
    Read(String),
}

/// An open media container: enumerated stream metadata plus pure forward
/// packet iteration. No seeking.
pub trait Container: Send {
    fn stream_count(&self) -> usize;

    /// `Unknown` for an out-of-range index.
    fn stream_kind(&self, index: usize) -> StreamKind;

    /// Codec/format metadata. `None` for non-A/V streams or bad indices.
    fn descriptor(&self, index: usize) -> Option<StreamDescriptor>;

    /// Container duration in AV_TIME_BASE units; `0` when unknown.
    fn total_duration(&self) -> i64;

    /// Next packet in demux order. `Ok(None)` signals end of stream.
    fn read_next_packet(&mut self) -> Result<Option<SliceRecord>, ContainerError>;

    /// Releases all underlying resources. Idempotent.
    fn close(&mut self);
}

// ── FfmpegContainer ──────────────────────────────────────────────────────────

pub struct FfmpegContainer {
    input:       Option<ffmpeg::format::context::Input>,
    kinds:       Vec<StreamKind>,
    descriptors: Vec<Option<StreamDescriptor>>,
    duration:    i64,
}

impl std::fmt::Debug for FfmpegContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfmpegContainer")
            .field("input_open", &self.input.is_some())
            .field("kinds", &self.kinds)
            .field("descriptors", &self.descriptors)
            .field("duration", &self.duration)
            .finish()
    }
}

impl FfmpegContainer {
    /// Probes `path`, reads stream metadata for every stream, and fails if
    /// neither an audio nor a video stream is present.
    pub fn open(path: &Path) -> Result<Self, ContainerError> {
        init_ffmpeg();

        if !path.exists() {
            return Err(ContainerError::NotFound(path.to_path_buf()));
        }

        let input = ffmpeg::format::input(&path)
            .map_err(|e| ContainerError::Format(e.to_string()))?;

        let mut kinds = Vec::new();
        let mut descriptors = Vec::new();
        for stream in input.streams() {
            let kind = kind_of(stream.parameters().medium());
            let descriptor = match kind {
                StreamKind::Video => {
                    Some(StreamDescriptor::Video(extract_video_info(&stream)))
                }
                StreamKind::Audio => {
                    Some(StreamDescriptor::Audio(extract_audio_info(&stream)))
                }
                _ => None,
            };
            kinds.push(kind);
            descriptors.push(descriptor);
        }

        if !kinds.iter().any(|k| matches!(k, StreamKind::Video | StreamKind::Audio)) {
            return Err(ContainerError::NoStreams);
        }

        let duration = input.duration().max(0);
        eprintln!(
            "[demux] opened {}: format {}, {} streams, {}s",
            path.display(),
            input.format().name(),
            kinds.len(),
            duration / i64::from(ffmpeg::ffi::AV_TIME_BASE),
        );
        for (i, d) in descriptors.iter().enumerate() {
            match d {
                Some(StreamDescriptor::Video(v)) => eprintln!(
                    "[demux]   stream {i}: video {} {}x{} @ {:.3} fps, {} bps",
                    v.codec_id, v.width, v.height, v.frame_rate, v.bit_rate,
                ),
                Some(StreamDescriptor::Audio(a)) => eprintln!(
                    "[demux]   stream {i}: audio {} {} Hz, {} ch ({}), {} bps",
                    a.codec_id, a.sample_rate, a.channels, a.channel_layout, a.bit_rate,
                ),
                None => eprintln!("[demux]   stream {i}: {}", kinds[i].as_str()),
            }
        }

        Ok(Self { input: Some(input), kinds, descriptors, duration })
    }
}

impl Container for FfmpegContainer {
    fn stream_count(&self) -> usize {
        self.kinds.len()
    }

    fn stream_kind(&self, index: usize) -> StreamKind {
        self.kinds.get(index).copied().unwrap_or(StreamKind::Unknown)
    }

    fn descriptor(&self, index: usize) -> Option<StreamDescriptor> {
        self.descriptors.get(index).cloned().flatten()
    }

    fn total_duration(&self) -> i64 {
        self.duration
    }

    fn read_next_packet(&mut self) -> Result<Option<SliceRecord>, ContainerError> {
        let Some(input) = self.input.as_mut() else {
            // Reading a closed handle is end-of-stream, not an error.
            return Ok(None);
        };

        let mut packet = ffmpeg::Packet::empty();
        match packet.read(input) {
            Ok(()) => {
                let index = packet.stream();
                Ok(Some(SliceRecord {
                    stream_index: index,
                    stream_kind:  self.kinds.get(index).copied().unwrap_or(StreamKind::Unknown),
                    pts:          packet.pts().unwrap_or(NO_TIMESTAMP),
                    dts:          packet.dts().unwrap_or(NO_TIMESTAMP),
                    duration:     packet.duration(),
                    pos:          packet.position() as i64,
                    size:         packet.size(),
                    is_key_frame: packet.is_key(),
                }))
            }
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(ContainerError::Read(e.to_string())),
        }
    }

    fn close(&mut self) {
        // Dropping the input context releases the avformat handle.
        self.input.take();
    }
}

fn kind_of(medium: ffmpeg::media::Type) -> StreamKind {
    match medium {
        ffmpeg::media::Type::Video => StreamKind::Video,
        ffmpeg::media::Type::Audio => StreamKind::Audio,
        ffmpeg::media::Type::Subtitle => StreamKind::Subtitle,
        ffmpeg::media::Type::Data => StreamKind::Data,
        _ => StreamKind::Unknown,
    }
}

// ── Metadata extraction ──────────────────────────────────────────────────────

fn extract_video_info(stream: &ffmpeg::format::stream::Stream) -> VideoStreamInfo {
    let params = stream.parameters();
    let codec_id = params.id();

    // Tag / bit rate / profile live on the codec parameters only.
    let (codec_tag, bit_rate, profile) = unsafe {
        let p = params.as_ptr();
        ((*p).codec_tag, (*p).bit_rate, profile_name((*p).codec_id, (*p).profile))
    };

    let mut info = VideoStreamInfo {
        stream_index: stream.index(),
        codec_id: codec_name(codec_id),
        codec_tag,
        bit_rate,
        profile,
        frame_rate: rational_to_f64(stream.avg_frame_rate()),
        ..VideoStreamInfo::default()
    };

    if let Ok(ctx) = ffmpeg::codec::context::Context::from_parameters(stream.parameters()) {
        if let Ok(video) = ctx.decoder().video() {
            info.width = video.width();
            info.height = video.height();
            info.format = format!("{:?}", video.format()).to_lowercase();
            let sar = video.aspect_ratio();
            info.sample_aspect_ratio = format!("{}:{}", sar.numerator(), sar.denominator());
            info.color_range = color_range_name(video.color_range());
            info.color_space = format!("{:?}", video.color_space()).to_lowercase();
        }
    }

    info
}

fn extract_audio_info(stream: &ffmpeg::format::stream::Stream) -> AudioStreamInfo {
    let params = stream.parameters();
    let codec_id = params.id();

    let (codec_tag, bit_rate, sample_rate, channels, channel_layout, bits_per_sample) = unsafe {
        let p = params.as_ptr();
        (
            (*p).codec_tag,
            (*p).bit_rate,
            (*p).sample_rate,
            (*p).ch_layout.nb_channels,
            channel_layout_name(&(*p).ch_layout),
            ffmpeg::ffi::av_get_bits_per_sample((*p).codec_id),
        )
    };

    let mut info = AudioStreamInfo {
        stream_index: stream.index(),
        codec_id: codec_name(codec_id),
        codec_tag,
        bit_rate,
        sample_rate,
        channels,
        channel_layout,
        bits_per_sample,
        ..AudioStreamInfo::default()
    };

    if let Ok(ctx) = ffmpeg::codec::context::Context::from_parameters(stream.parameters()) {
        if let Ok(audio) = ctx.decoder().audio() {
            info.format = sample_format_name(audio.format());
        }
    }

    info
}

fn codec_name(id: ffmpeg::codec::Id) -> String {
    match ffmpeg::codec::decoder::find(id) {
        Some(codec) => codec.name().to_string(),
        None => format!("{id:?}").to_lowercase(),
    }
}

fn rational_to_f64(r: ffmpeg::Rational) -> f64 {
    if r.denominator() != 0 {
        f64::from(r.numerator()) / f64::from(r.denominator())
    } else {
        0.0
    }
}

fn color_range_name(range: ffmpeg::util::color::Range) -> String {
    // The tv/pc names are the ones ffprobe prints.
    match range {
        ffmpeg::util::color::Range::MPEG => "tv".into(),
        ffmpeg::util::color::Range::JPEG => "pc".into(),
        _ => "unspecified".into(),
    }
}

fn sample_format_name(format: ffmpeg::format::Sample) -> String {
    use ffmpeg::format::sample::Type;
    use ffmpeg::format::Sample;

    let (base, ty) = match format {
        Sample::None => return "unknown".into(),
        Sample::U8(t) => ("u8", t),
        Sample::I16(t) => ("s16", t),
        Sample::I32(t) => ("s32", t),
        Sample::I64(t) => ("s64", t),
        Sample::F32(t) => ("flt", t),
        Sample::F64(t) => ("dbl", t),
    };
    match ty {
        Type::Packed => base.into(),
        Type::Planar => format!("{base}p"),
    }
}

unsafe fn profile_name(codec_id: ffmpeg::ffi::AVCodecID, profile: i32) -> String {
    let name = ffmpeg::ffi::avcodec_profile_name(codec_id, profile);
    if name.is_null() {
        "unknown".into()
    } else {
        CStr::from_ptr(name).to_string_lossy().into_owned()
    }
}

unsafe fn channel_layout_name(layout: &ffmpeg::ffi::AVChannelLayout) -> String {
    let mut buf = [0i8; 128];
    let ret = ffmpeg::ffi::av_channel_layout_describe(layout, buf.as_mut_ptr() as *mut _, buf.len());
    if ret < 0 {
        return "unknown".into();
    }
    CStr::from_ptr(buf.as_ptr() as *const _).to_string_lossy().into_owned()
}

// ── Test double ──────────────────────────────────────────────────────────────
