//! ffmpeg-backed remux engine
//!
//! Opening and probing run `ffprobe` once; the fragmented output is an
//! `ffmpeg` child process in stream-copy mode writing fMP4 to stdout, which
//! [`Fmp4Output`] splits into header, fragments and trailer.

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use serde::Deserialize;

use super::engine::{
    FragmentWriter, MediaInput, MediaKind, OutputOptions, RemuxEngine, StreamInfo,
};
use super::error::EngineError;
use super::fmp4::{BoxReader, Fmp4Output, DEFAULT_MAX_BOX_SIZE};
use super::sink::SegmentSink;

/// ffmpeg engine configuration
#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    /// Path to the ffmpeg binary
    pub ffmpeg_path: PathBuf,
    /// Path to the ffprobe binary
    pub ffprobe_path: PathBuf,
    /// Extra input options, placed before `-i`
    pub input_args: Vec<String>,
    /// Largest top-level box accepted from ffmpeg
    pub max_box_size: u64,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            input_args: Vec::new(),
            max_box_size: DEFAULT_MAX_BOX_SIZE,
        }
    }
}

impl FfmpegConfig {
    /// Set the ffmpeg binary
    pub fn ffmpeg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    /// Set the ffprobe binary
    pub fn ffprobe_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffprobe_path = path.into();
        self
    }

    /// Append an extra input option
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Force the RTSP lower transport (`tcp` or `udp`)
    pub fn rtsp_transport(self, transport: impl Into<String>) -> Self {
        self.input_arg("-rtsp_transport").input_arg(transport)
    }

    /// Set the box size ceiling
    pub fn max_box_size(mut self, size: u64) -> Self {
        self.max_box_size = size;
        self
    }
}

/// Remux engine driving ffprobe and ffmpeg subprocesses
#[derive(Debug, Clone, Default)]
pub struct FfmpegEngine {
    config: FfmpegConfig,
}

impl FfmpegEngine {
    /// Create an engine using `ffmpeg`/`ffprobe` from `PATH`
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with a custom configuration
    pub fn with_config(config: FfmpegConfig) -> Self {
        Self { config }
    }

    /// Get the engine configuration
    pub fn config(&self) -> &FfmpegConfig {
        &self.config
    }
}

impl RemuxEngine for FfmpegEngine {
    type Input = FfmpegInput;

    fn open(&self, locator: &str) -> Result<FfmpegInput, EngineError> {
        let program = self.config.ffprobe_path.display().to_string();

        tracing::debug!(program = %program, locator = locator, "Probing source");

        let output = Command::new(&self.config.ffprobe_path)
            .args(["-v", "error"])
            .args(&self.config.input_args)
            .args(["-show_streams", "-of", "json"])
            .arg(locator)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| EngineError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Exited {
                program,
                status: output.status,
                detail: stderr.lines().last().unwrap_or_default().to_string(),
            });
        }

        Ok(FfmpegInput {
            config: self.config.clone(),
            locator: locator.to_string(),
            probe_output: output.stdout,
        })
    }
}

/// Source opened by [`FfmpegEngine`]
#[derive(Debug)]
pub struct FfmpegInput {
    config: FfmpegConfig,
    locator: String,
    probe_output: Vec<u8>,
}

impl FfmpegInput {
    /// Arguments for the ffmpeg output process
    pub fn output_args(&self, video: &StreamInfo, options: &OutputOptions) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-loglevel", "error"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        args.extend(self.config.input_args.iter().cloned());
        args.extend(["-i".to_string(), self.locator.clone()]);
        args.extend(["-map".to_string(), format!("0:{}", video.index)]);

        // Stream copy: remux only, never re-encode
        args.extend(["-c".to_string(), "copy".to_string()]);
        args.extend(["-f".to_string(), "mp4".to_string()]);
        args.extend(["-movflags".to_string(), options.movflags.clone()]);
        args.push("pipe:1".to_string());

        args
    }
}

impl MediaInput for FfmpegInput {
    type Output = FfmpegOutput;

    fn probe(&mut self) -> Result<Vec<StreamInfo>, EngineError> {
        parse_probe_output(&self.probe_output)
    }

    fn open_output(
        &mut self,
        video: &StreamInfo,
        options: &OutputOptions,
    ) -> Result<FfmpegOutput, EngineError> {
        let program = self.config.ffmpeg_path.display().to_string();
        let args = self.output_args(video, options);

        tracing::info!(program = %program, args = ?args, "Starting remux process");

        let child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: program.clone(),
                source,
            })?;

        // From here on `output` owns the child; early returns kill and reap it
        let mut output = FfmpegOutput {
            inner: None,
            child,
            stderr_thread: None,
            last_error: Arc::new(Mutex::new(String::new())),
            program,
            exited: false,
        };

        if let Some(stderr) = output.child.stderr.take() {
            let last_error = Arc::clone(&output.last_error);
            let handle = thread::Builder::new()
                .name("ffmpeg-stderr".to_string())
                .spawn(move || {
                    for line in BufReader::new(stderr).lines() {
                        let Ok(line) = line else { break };
                        tracing::warn!(target: "ffmpeg", "{}", line);
                        *last_error.lock() = line;
                    }
                })?;
            output.stderr_thread = Some(handle);
        }

        let stdout = output.child.stdout.take().ok_or_else(|| {
            EngineError::Format("ffmpeg stdout was not captured".to_string())
        })?;
        let reader = BufReader::with_capacity(options.io_buffer_size, stdout);
        output.inner = Some(Fmp4Output::from_box_reader(BoxReader::with_max_box_size(
            reader,
            self.config.max_box_size,
        )));

        Ok(output)
    }
}

/// Running ffmpeg process producing fMP4
///
/// Dropping the output kills the process if it is still running, reaps it,
/// and joins the stderr forwarding thread.
pub struct FfmpegOutput {
    inner: Option<Fmp4Output<BufReader<ChildStdout>>>,
    child: Child,
    stderr_thread: Option<JoinHandle<()>>,
    last_error: Arc<Mutex<String>>,
    program: String,
    exited: bool,
}

impl FfmpegOutput {
    fn stream(&mut self) -> Result<&mut Fmp4Output<BufReader<ChildStdout>>, EngineError> {
        self.inner
            .as_mut()
            .ok_or_else(|| EngineError::Format("ffmpeg output is not connected".to_string()))
    }

    fn wait_for_exit(&mut self) -> Result<(), EngineError> {
        let status = self.child.wait()?;
        self.exited = true;

        if status.success() {
            tracing::debug!(program = %self.program, "Remux process exited");
            Ok(())
        } else {
            Err(EngineError::Exited {
                program: self.program.clone(),
                status,
                detail: self.last_error.lock().clone(),
            })
        }
    }
}

impl FragmentWriter for FfmpegOutput {
    fn write_header(&mut self, sink: &mut dyn SegmentSink) -> Result<(), EngineError> {
        self.stream()?.write_header(sink)
    }

    fn write_fragment(&mut self, sink: &mut dyn SegmentSink) -> Result<bool, EngineError> {
        let more = self.stream()?.write_fragment(sink)?;
        if !more {
            self.wait_for_exit()?;
        }
        Ok(more)
    }

    fn write_trailer(&mut self, sink: &mut dyn SegmentSink) -> Result<(), EngineError> {
        self.stream()?.write_trailer(sink)
    }
}

impl Drop for FfmpegOutput {
    fn drop(&mut self) {
        // Close our end of stdout first so a blocked writer sees EPIPE
        self.inner.take();

        if !self.exited {
            if let Err(e) = self.child.kill() {
                tracing::debug!(program = %self.program, error = %e, "Kill failed");
            }
            let _ = self.child.wait();
        }

        if let Some(handle) = self.stderr_thread.take() {
            let _ = handle.join();
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    index: usize,
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    disposition: ProbeDisposition,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeDisposition {
    #[serde(default)]
    default: u8,
    #[serde(default)]
    attached_pic: u8,
}

/// Parse `ffprobe -show_streams -of json` output
pub fn parse_probe_output(json: &[u8]) -> Result<Vec<StreamInfo>, EngineError> {
    let output: ProbeOutput = serde_json::from_slice(json)?;

    Ok(output
        .streams
        .into_iter()
        .map(|s| StreamInfo {
            index: s.index,
            kind: MediaKind::from_codec_type(s.codec_type.as_deref().unwrap_or_default()),
            codec: s.codec_name,
            width: s.width,
            height: s.height,
            is_default: s.disposition.default != 0,
            is_attached_pic: s.disposition.attached_pic != 0,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::ingest::fmp4::tests::{make_box, sample_stream};

    const PROBE_JSON: &str = r#"{
        "streams": [
            {
                "index": 0,
                "codec_name": "aac",
                "codec_type": "audio",
                "disposition": { "default": 1, "attached_pic": 0 }
            },
            {
                "index": 1,
                "codec_name": "h264",
                "codec_type": "video",
                "width": 1280,
                "height": 720,
                "disposition": { "default": 1, "attached_pic": 0 }
            }
        ]
    }"#;

    fn input(locator: &str, config: FfmpegConfig) -> FfmpegInput {
        FfmpegInput {
            config,
            locator: locator.to_string(),
            probe_output: PROBE_JSON.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_parse_probe_output() {
        let streams = parse_probe_output(PROBE_JSON.as_bytes()).unwrap();

        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].kind, MediaKind::Audio);
        assert_eq!(streams[1].kind, MediaKind::Video);
        assert_eq!(streams[1].codec.as_deref(), Some("h264"));
        assert_eq!(streams[1].width, Some(1280));
        assert!(streams[1].is_default);
        assert!(!streams[1].is_attached_pic);
    }

    #[test]
    fn test_parse_probe_output_empty() {
        assert!(parse_probe_output(b"{}").unwrap().is_empty());
        assert!(matches!(
            parse_probe_output(b"not json"),
            Err(EngineError::Probe(_))
        ));
    }

    #[test]
    fn test_probe_uses_captured_output() {
        let mut input = input("rtsp://camera/stream", FfmpegConfig::default());

        let streams = input.probe().unwrap();
        assert_eq!(streams.len(), 2);
    }

    #[test]
    fn test_output_args() {
        let config = FfmpegConfig::default().rtsp_transport("tcp");
        let input = input("rtsp://camera/stream", config);
        let video = StreamInfo::new(1, MediaKind::Video);

        let args = input.output_args(&video, &OutputOptions::default());
        let joined = args.join(" ");

        assert!(joined.contains("-rtsp_transport tcp -i rtsp://camera/stream"));
        assert!(joined.contains("-map 0:1"));
        assert!(joined.contains("-c copy"));
        assert!(joined.contains("-movflags frag_keyframe+empty_moov+default_base_moof"));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn test_open_missing_binary() {
        let config = FfmpegConfig::default().ffprobe_path("/nonexistent/ffprobe-binary");
        let engine = FfmpegEngine::with_config(config);

        let result = engine.open("rtsp://camera/stream");
        assert!(matches!(result, Err(EngineError::Spawn { .. })));
    }

    #[test]
    fn test_config_builder() {
        let config = FfmpegConfig::default()
            .ffmpeg_path("/opt/ffmpeg")
            .ffprobe_path("/opt/ffprobe")
            .input_arg("-re")
            .max_box_size(1024);

        assert_eq!(config.ffmpeg_path, PathBuf::from("/opt/ffmpeg"));
        assert_eq!(config.ffprobe_path, PathBuf::from("/opt/ffprobe"));
        assert_eq!(config.input_args, vec!["-re".to_string()]);
        assert_eq!(config.max_box_size, 1024);
    }

    /// Write an executable shell script standing in for ffmpeg or ffprobe
    #[cfg(unix)]
    fn script(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    fn scripted_output(dir: &tempfile::TempDir, stream: &[u8], tail: &str) -> FfmpegOutput {
        let data = dir.path().join("stream.mp4");
        std::fs::write(&data, stream).unwrap();
        let ffmpeg = script(dir, "ffmpeg", &format!("cat '{}'\n{tail}", data.display()));

        let mut input = input("rtsp://camera/stream", FfmpegConfig::default().ffmpeg_path(ffmpeg));
        input
            .open_output(&StreamInfo::new(1, MediaKind::Video), &OutputOptions::default())
            .unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn test_output_clean_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut output = scripted_output(&dir, &sample_stream(), "exit 0");
        let mut sink: Vec<Vec<u8>> = Vec::new();

        output.write_header(&mut sink).unwrap();
        assert!(output.write_fragment(&mut sink).unwrap());
        assert!(output.write_fragment(&mut sink).unwrap());
        assert!(!output.write_fragment(&mut sink).unwrap());
        output.write_trailer(&mut sink).unwrap();

        // ftyp, moov, two fragments, mfra
        assert_eq!(sink.len(), 5);
    }

    #[cfg(unix)]
    #[test]
    fn test_output_nonzero_exit_fails_fragment_stage() {
        let dir = tempfile::tempdir().unwrap();
        let tail = "echo 'decode error' >&2\nexit 3";
        let mut output = scripted_output(&dir, &sample_stream(), tail);
        let mut sink: Vec<Vec<u8>> = Vec::new();

        output.write_header(&mut sink).unwrap();
        assert!(output.write_fragment(&mut sink).unwrap());
        assert!(output.write_fragment(&mut sink).unwrap());

        match output.write_fragment(&mut sink) {
            Err(EngineError::Exited { status, .. }) => assert_eq!(status.code(), Some(3)),
            other => panic!("expected exit failure, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_drop_kills_running_process() {
        let dir = tempfile::tempdir().unwrap();
        let header = [make_box(b"ftyp", b"isom"), make_box(b"moov", b"trak")].concat();
        let mut output = scripted_output(&dir, &header, "exec sleep 100");
        let mut sink: Vec<Vec<u8>> = Vec::new();

        output.write_header(&mut sink).unwrap();
        assert_eq!(sink.len(), 2);

        let started = Instant::now();
        drop(output);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn test_open_probe_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ffprobe = script(&dir, "ffprobe", "echo 'Connection refused' >&2\nexit 1");
        let engine = FfmpegEngine::with_config(FfmpegConfig::default().ffprobe_path(ffprobe));

        match engine.open("rtsp://camera/stream") {
            Err(EngineError::Exited { status, detail, .. }) => {
                assert_eq!(status.code(), Some(1));
                assert_eq!(detail, "Connection refused");
            }
            Err(e) => panic!("expected exit failure, got {e}"),
            Ok(_) => panic!("probe failure was not reported"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_open_captures_probe_output() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("probe.json");
        std::fs::write(&json, PROBE_JSON).unwrap();
        let ffprobe = script(&dir, "ffprobe", &format!("cat '{}'", json.display()));
        let engine = FfmpegEngine::with_config(FfmpegConfig::default().ffprobe_path(ffprobe));

        let mut input = engine.open("rtsp://camera/stream").unwrap();
        let streams = input.probe().unwrap();

        assert_eq!(streams.len(), 2);
        assert_eq!(streams[1].kind, MediaKind::Video);
    }
}
