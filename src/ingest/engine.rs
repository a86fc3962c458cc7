//! Remux engine contract
//!
//! The ingest pipeline drives an engine through a fixed sequence of stages:
//!
//! ```text
//! RemuxEngine::open ──► MediaInput::probe ──► select video stream
//!        │
//!        └──► MediaInput::open_output ──► FragmentWriter::write_header
//!                                              │   (store.mark_ready)
//!                                              ▼
//!                                  write_fragment ... ──► write_trailer
//! ```
//!
//! Every stage hands back an owned value. Resources (processes, pipes,
//! buffers) live inside those values and are released by `Drop` on every
//! exit path.

use std::fmt;

use super::error::EngineError;
use super::sink::SegmentSink;

/// Default movflags producing a browser-friendly fragmented MP4
pub const DEFAULT_MOVFLAGS: &str = "frag_keyframe+empty_moov+default_base_moof";

/// Default muxer I/O buffer size
pub const DEFAULT_IO_BUFFER_SIZE: usize = 8192;

/// Kind of elementary stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Subtitle,
    Data,
    Other,
}

impl MediaKind {
    /// Map an ffprobe-style `codec_type` string
    pub fn from_codec_type(codec_type: &str) -> Self {
        match codec_type {
            "video" => MediaKind::Video,
            "audio" => MediaKind::Audio,
            "subtitle" => MediaKind::Subtitle,
            "data" => MediaKind::Data,
            _ => MediaKind::Other,
        }
    }
}

/// Elementary stream reported by probing the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Stream index within the source
    pub index: usize,
    /// Stream kind
    pub kind: MediaKind,
    /// Codec name, if known
    pub codec: Option<String>,
    /// Frame width (video only)
    pub width: Option<u32>,
    /// Frame height (video only)
    pub height: Option<u32>,
    /// Whether the source flags this stream as the default
    pub is_default: bool,
    /// Whether this is an attached picture (cover art) rather than video
    pub is_attached_pic: bool,
}

impl StreamInfo {
    /// Create a stream description with only index and kind set
    pub fn new(index: usize, kind: MediaKind) -> Self {
        Self {
            index,
            kind,
            codec: None,
            width: None,
            height: None,
            is_default: false,
            is_attached_pic: false,
        }
    }

    fn pixel_area(&self) -> u64 {
        u64::from(self.width.unwrap_or(0)) * u64::from(self.height.unwrap_or(0))
    }
}

impl fmt::Display for StreamInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {:?} {}",
            self.index,
            self.kind,
            self.codec.as_deref().unwrap_or("unknown")
        )?;
        if let (Some(w), Some(h)) = (self.width, self.height) {
            write!(f, " {}x{}", w, h)?;
        }
        Ok(())
    }
}

/// Pick the video stream to relay
///
/// Attached pictures are skipped. Among the rest, the stream flagged default
/// wins, then the largest frame, then the lowest index.
pub fn select_video_stream(streams: &[StreamInfo]) -> Option<&StreamInfo> {
    streams
        .iter()
        .filter(|s| s.kind == MediaKind::Video && !s.is_attached_pic)
        .max_by(|a, b| {
            a.is_default
                .cmp(&b.is_default)
                .then(a.pixel_area().cmp(&b.pixel_area()))
                .then(b.index.cmp(&a.index))
        })
}

/// Fragmented output configuration
#[derive(Debug, Clone)]
pub struct OutputOptions {
    /// Muxer movflags
    pub movflags: String,
    /// Size of the buffer between the muxer and the sink
    pub io_buffer_size: usize,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            movflags: DEFAULT_MOVFLAGS.to_string(),
            io_buffer_size: DEFAULT_IO_BUFFER_SIZE,
        }
    }
}

impl OutputOptions {
    /// Set the muxer movflags
    pub fn movflags(mut self, flags: impl Into<String>) -> Self {
        self.movflags = flags.into();
        self
    }

    /// Set the I/O buffer size
    pub fn io_buffer_size(mut self, size: usize) -> Self {
        self.io_buffer_size = size.max(1);
        self
    }
}

/// Engine able to open a source for remuxing
pub trait RemuxEngine {
    /// Opened source
    type Input: MediaInput;

    /// Open the source identified by `locator`
    fn open(&self, locator: &str) -> Result<Self::Input, EngineError>;
}

/// An opened source
pub trait MediaInput {
    /// Fragmented output bound to one of this input's streams
    type Output: FragmentWriter;

    /// Read the source's stream information
    fn probe(&mut self) -> Result<Vec<StreamInfo>, EngineError>;

    /// Configure a fragmented output carrying `video`
    fn open_output(
        &mut self,
        video: &StreamInfo,
        options: &OutputOptions,
    ) -> Result<Self::Output, EngineError>;
}

/// Fragmented muxer output
pub trait FragmentWriter {
    /// Write the initialization segment
    ///
    /// Returning `Ok` means every init byte has reached the sink.
    fn write_header(&mut self, sink: &mut dyn SegmentSink) -> Result<(), EngineError>;

    /// Write the next fragment, returning `false` at end of stream
    fn write_fragment(&mut self, sink: &mut dyn SegmentSink) -> Result<bool, EngineError>;

    /// Write whatever follows the last fragment
    fn write_trailer(&mut self, sink: &mut dyn SegmentSink) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(index: usize, width: u32, height: u32) -> StreamInfo {
        StreamInfo {
            width: Some(width),
            height: Some(height),
            ..StreamInfo::new(index, MediaKind::Video)
        }
    }

    #[test]
    fn test_select_skips_non_video() {
        let streams = vec![
            StreamInfo::new(0, MediaKind::Audio),
            video(1, 640, 360),
            StreamInfo::new(2, MediaKind::Data),
        ];

        assert_eq!(select_video_stream(&streams).unwrap().index, 1);
    }

    #[test]
    fn test_select_none_without_video() {
        let streams = vec![StreamInfo::new(0, MediaKind::Audio)];

        assert!(select_video_stream(&streams).is_none());
        assert!(select_video_stream(&[]).is_none());
    }

    #[test]
    fn test_select_prefers_default_then_area() {
        let mut small_default = video(0, 320, 240);
        small_default.is_default = true;
        let streams = vec![small_default, video(1, 1920, 1080)];
        assert_eq!(select_video_stream(&streams).unwrap().index, 0);

        let streams = vec![video(0, 320, 240), video(1, 1920, 1080)];
        assert_eq!(select_video_stream(&streams).unwrap().index, 1);
    }

    #[test]
    fn test_select_lowest_index_on_tie() {
        let streams = vec![video(3, 640, 360), video(5, 640, 360)];

        assert_eq!(select_video_stream(&streams).unwrap().index, 3);
    }

    #[test]
    fn test_select_skips_attached_picture() {
        let mut cover = video(0, 3000, 3000);
        cover.is_attached_pic = true;
        let streams = vec![cover, video(1, 640, 360)];

        assert_eq!(select_video_stream(&streams).unwrap().index, 1);
    }

    #[test]
    fn test_output_options_builder() {
        let options = OutputOptions::default()
            .movflags("frag_keyframe")
            .io_buffer_size(0);

        assert_eq!(options.movflags, "frag_keyframe");
        assert_eq!(options.io_buffer_size, 1);
        assert_eq!(OutputOptions::default().movflags, DEFAULT_MOVFLAGS);
    }

    #[test]
    fn test_stream_info_display() {
        let mut stream = video(2, 1280, 720);
        stream.codec = Some("h264".to_string());

        assert_eq!(stream.to_string(), "#2 Video h264 1280x720");
    }
}
