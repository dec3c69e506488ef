use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ffmpeg_next::Rational;
use ffmpeg_next::codec;
use ffmpeg_next::format::Pixel;
use tokio_util::sync::CancellationToken;

use crate::capture::{CaptureFrame, DisplayMode, InputCallback};
use crate::decoder::{Decoder, run_decode_stage};
use crate::encoder::{self, AudioEncoder, VideoCodec, VideoEncoder, run_encode_stage};
use crate::frame::DecodedFrame;
use crate::output::{RecordOutput, run_write_stage};
use crate::packet::{EncodedPacket, RawUnit};
use crate::queue::StageQueue;

/// Stage backoff when a queue is observed empty but upstream is still live.
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Hard cap per session. The capture delegate deactivates itself once the
/// count is exceeded, so a runaway source cannot grow the file forever.
pub const MAX_CAPTURE_SAMPLES: u64 = 500;

/// Flags the three stage loops coordinate through. `capture_active` is the
/// only externally driven one; the running flags are each cleared by their
/// own stage on exit, after any flush.
pub struct PipelineShared {
    capture_active: AtomicBool,
    decode_running: AtomicBool,
    encode_running: AtomicBool,
    sample_count: AtomicU64,
}

impl PipelineShared {
    fn new() -> Self {
        Self {
            capture_active: AtomicBool::new(false),
            decode_running: AtomicBool::new(false),
            encode_running: AtomicBool::new(false),
            sample_count: AtomicU64::new(0),
        }
    }

    pub fn capture_active(&self) -> bool {
        self.capture_active.load(Ordering::Acquire)
    }

    pub(crate) fn set_capture_active(&self, active: bool) {
        self.capture_active.store(active, Ordering::Release);
    }

    pub fn decode_running(&self) -> bool {
        self.decode_running.load(Ordering::Acquire)
    }

    pub(crate) fn set_decode_running(&self, running: bool) {
        self.decode_running.store(running, Ordering::Release);
    }

    pub fn encode_running(&self) -> bool {
        self.encode_running.load(Ordering::Acquire)
    }

    pub(crate) fn set_encode_running(&self, running: bool) {
        self.encode_running.store(running, Ordering::Release);
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone)]
pub struct RecordConfig {
    pub destination: String,
    pub width: u32,
    pub height: u32,
    pub input_codec: codec::Id,
    pub input_pixel_format: Pixel,
    pub codec: VideoCodec,
    pub record_audio: bool,
}

impl RecordConfig {
    pub fn from_mode(destination: impl Into<String>, mode: DisplayMode) -> Self {
        Self {
            destination: destination.into(),
            width: mode.width,
            height: mode.height,
            input_codec: codec::Id::RAWVIDEO,
            input_pixel_format: mode.pixel_format,
            codec: VideoCodec::ProRes,
            record_audio: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    Initialized,
    Running,
    Stopping,
    Cleaned,
}

/// Everything built at init and handed to the stage loops at start.
struct Session {
    decoder: Decoder,
    video: VideoEncoder,
    audio: Option<AudioEncoder>,
}

struct StageHandles {
    decode: tokio::task::JoinHandle<()>,
    encode: tokio::task::JoinHandle<()>,
    write: tokio::task::JoinHandle<()>,
}

/// Pipeline controller. Owns the queues, the shared flags and the session
/// lifecycle: init builds every context up front, start spawns the three
/// stage loops, stop drains them, clean_up finalizes the container.
pub struct Recorder {
    config: RecordConfig,
    state: State,
    shared: Arc<PipelineShared>,
    units: Arc<StageQueue<RawUnit>>,
    frames: Arc<StageQueue<DecodedFrame>>,
    packets: Arc<StageQueue<EncodedPacket>>,
    shutdown: CancellationToken,
    capture_time_base: Option<Rational>,
    video_stream_index: usize,
    output: Option<Arc<Mutex<RecordOutput>>>,
    session: Option<Session>,
    stages: Option<StageHandles>,
}

impl Recorder {
    pub fn new(config: RecordConfig) -> Self {
        Self {
            config,
            state: State::Created,
            shared: Arc::new(PipelineShared::new()),
            units: Arc::new(StageQueue::new()),
            frames: Arc::new(StageQueue::new()),
            packets: Arc::new(StageQueue::new()),
            shutdown: CancellationToken::new(),
            capture_time_base: None,
            video_stream_index: 0,
            output: None,
            session: None,
            stages: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_capture_active(&self) -> bool {
        self.shared.capture_active()
    }

    pub fn sample_count(&self) -> u64 {
        self.shared.sample_count()
    }

    /// Cancelled by the write stage once the container is finalized.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Builds the whole pipeline up front: output container, decode context,
    /// encode context(s), container streams and header. `time_base` is the
    /// capture mode's frame rate rational, adopted verbatim. On any failure
    /// the recorder stays in `Created` and no stage runs.
    pub fn init(&mut self, time_base: Rational) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.state == State::Created,
            "init called in state {:?}",
            self.state
        );

        let mut output = RecordOutput::create(&self.config.destination)?;
        let global_header = output.needs_global_header();

        let decoder = Decoder::new(
            self.config.input_codec,
            self.config.input_pixel_format,
            self.config.width,
            self.config.height,
            time_base,
        )?;

        let mut video = VideoEncoder::open(
            &encoder::Settings {
                width: self.config.width,
                height: self.config.height,
                codec: self.config.codec,
                time_base,
            },
            global_header,
        )?;
        let video_stream_index = output.add_video_stream(&video)?;
        video.assign_stream(video_stream_index);

        let audio = if self.config.record_audio {
            let mut audio = AudioEncoder::open(global_header)?;
            let index = output.add_audio_stream(&audio)?;
            audio.assign_stream(index);
            Some(audio)
        } else {
            None
        };

        output.write_header()?;

        self.capture_time_base = Some(time_base);
        self.video_stream_index = video_stream_index;
        self.output = Some(Arc::new(Mutex::new(output)));
        self.session = Some(Session {
            decoder,
            video,
            audio,
        });
        self.state = State::Initialized;
        log::info!(
            "recorder initialized: {} ({}x{}, {:?})",
            self.config.destination,
            self.config.width,
            self.config.height,
            self.config.codec
        );
        Ok(())
    }

    /// Activates capture and spawns the three stage loops.
    pub fn start(&mut self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.state == State::Initialized,
            "start called in state {:?}",
            self.state
        );
        let session = self
            .session
            .take()
            .ok_or_else(|| anyhow::anyhow!("no session"))?;
        let output = self
            .output
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no output"))?;
        let Session {
            decoder,
            video,
            audio,
        } = session;

        self.shared.set_decode_running(true);
        self.shared.set_encode_running(true);
        self.shared.set_capture_active(true);

        let decode = {
            let units = self.units.clone();
            let frames = self.frames.clone();
            let shared = self.shared.clone();
            tokio::task::spawn_blocking(move || run_decode_stage(decoder, units, frames, shared))
        };
        let encode = {
            let frames = self.frames.clone();
            let packets = self.packets.clone();
            let shared = self.shared.clone();
            tokio::task::spawn_blocking(move || {
                run_encode_stage(video, audio, frames, packets, shared)
            })
        };
        let write = {
            let packets = self.packets.clone();
            let shared = self.shared.clone();
            let shutdown = self.shutdown.clone();
            tokio::task::spawn_blocking(move || {
                run_write_stage(output, packets, shared, shutdown)
            })
        };

        self.stages = Some(StageHandles {
            decode,
            encode,
            write,
        });
        self.state = State::Running;
        log::info!("recorder started");
        Ok(())
    }

    /// Deactivates capture and waits for every stage to drain and exit.
    pub async fn stop(&mut self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.state == State::Running,
            "stop called in state {:?}",
            self.state
        );
        self.state = State::Stopping;
        self.shared.set_capture_active(false);

        let stages = self
            .stages
            .take()
            .ok_or_else(|| anyhow::anyhow!("no running stages"))?;
        stages.decode.await?;
        stages.encode.await?;
        stages.write.await?;
        log::info!("recorder stopped after {} sample(s)", self.sample_count());
        Ok(())
    }

    /// Finalizes the container and drops the session. Idempotent, and safe
    /// in any state, including right after a failed init.
    pub fn clean_up(&mut self) -> anyhow::Result<()> {
        if let Some(output) = &self.output {
            output.lock().unwrap().finish()?;
        }
        self.session = None;
        self.state = State::Cleaned;
        Ok(())
    }

    /// The capture-facing delegate. Hand this to the driver (or a test
    /// source); it feeds the decode queue until capture deactivates.
    pub fn callback(&self) -> anyhow::Result<Arc<dyn InputCallback>> {
        let time_base = self
            .capture_time_base
            .ok_or_else(|| anyhow::anyhow!("recorder not initialized"))?;
        Ok(Arc::new(CaptureDelegate {
            shared: self.shared.clone(),
            units: self.units.clone(),
            time_base,
            stream_index: self.video_stream_index,
        }))
    }
}

struct CaptureDelegate {
    shared: Arc<PipelineShared>,
    units: Arc<StageQueue<RawUnit>>,
    time_base: Rational,
    stream_index: usize,
}

impl InputCallback for CaptureDelegate {
    fn video_frame_arrived(&self, frame: CaptureFrame<'_>) {
        let count = self.shared.sample_count.fetch_add(1, Ordering::AcqRel) + 1;
        if count > MAX_CAPTURE_SAMPLES {
            if self.shared.capture_active() {
                log::info!("sample cap {} reached, deactivating capture", MAX_CAPTURE_SAMPLES);
            }
            self.shared.set_capture_active(false);
        }
        if !self.shared.capture_active() {
            return;
        }
        if !frame.has_signal {
            log::info!("sample {}: no input signal, discarded", count);
            return;
        }
        self.units.push(RawUnit::from_capture(
            frame.data,
            frame.stream_time,
            frame.duration,
            self.time_base,
            self.stream_index,
        ));
    }

    fn display_mode_changed(&self, mode: DisplayMode) {
        log::info!(
            "display mode changed: {}x{} @ {:?}",
            mode.width,
            mode.height,
            mode.time_base
        );
    }
}

#[cfg(test)]
#[path = "recorder_test.rs"]
mod recorder_test;
