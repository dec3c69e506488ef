use std::sync::Arc;
use std::thread;

use ffmpeg_next::codec::{self, threading};
use ffmpeg_next::format::{self, Pixel};
use ffmpeg_next::software::scaling;
use ffmpeg_next::{ChannelLayout, Dictionary, Rational};

use crate::frame::{AudioFrame, DecodedFrame, VideoFrame};
use crate::packet::EncodedPacket;
use crate::queue::StageQueue;
use crate::recorder::{PipelineShared, POLL_INTERVAL};

/// Target codec, chosen per session. Both variants produce intra-only
/// streams so any output frame is a clean edit point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    ProRes,
    H264,
}

impl VideoCodec {
    pub fn codec_id(&self) -> codec::Id {
        match self {
            VideoCodec::ProRes => codec::Id::PRORES,
            VideoCodec::H264 => codec::Id::H264,
        }
    }

    pub fn pixel_format(&self) -> Pixel {
        match self {
            VideoCodec::ProRes => Pixel::YUV422P10LE,
            VideoCodec::H264 => Pixel::YUV420P,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub width: u32,
    pub height: u32,
    pub codec: VideoCodec,
    pub time_base: Rational,
}

pub struct VideoEncoder {
    inner: codec::encoder::Video,
    time_base: Rational,
    stream_index: usize,
    // canonical buffer in the encoder's pixel format, reused across frames
    frame: ffmpeg_next::frame::Video,
    scaler: Option<scaling::Context>,
    flushed: bool,
}

// The scaling context holds raw pointers and is only ever touched from the
// encode stage thread that owns the encoder.
unsafe impl Send for VideoEncoder {}

impl VideoEncoder {
    pub fn open(settings: &Settings, global_header: bool) -> anyhow::Result<Self> {
        let codec_id = settings.codec.codec_id();
        let codec = ffmpeg_next::encoder::find(codec_id)
            .ok_or_else(|| anyhow::anyhow!("encoder not found: {:?}", codec_id))?;
        let mut encoder = codec::Context::new_with_codec(codec).encoder().video()?;
        encoder.set_width(settings.width);
        encoder.set_height(settings.height);
        encoder.set_format(settings.codec.pixel_format());
        encoder.set_time_base(settings.time_base);
        encoder.set_frame_rate(Some(Rational::new(
            settings.time_base.denominator(),
            settings.time_base.numerator(),
        )));
        if global_header {
            encoder.set_flags(codec::Flags::GLOBAL_HEADER);
        }
        // Slice threading keeps the encoder synchronous: one packet out per
        // frame in, which the per-frame timestamp stamping below relies on.
        // Frame threading would buffer up to `count` frames inside the
        // encoder and break that mapping.
        let mut threading_config = threading::Config::default();
        threading_config.count = 4;
        threading_config.kind = threading::Type::Slice;
        encoder.set_threading(threading_config);

        let mut options = Dictionary::new();
        match settings.codec {
            VideoCodec::ProRes => {
                options.set("profile", "lt");
            }
            VideoCodec::H264 => {
                // every frame a keyframe
                encoder.set_gop(1);
                unsafe {
                    (*encoder.as_mut_ptr()).keyint_min = 1;
                }
                options.set("profile", "high");
            }
        }

        let opened = encoder.open_with(options)?;
        let encoder_time_base: Rational = unsafe { (*opened.0.as_ptr()).time_base.into() };
        let frame = ffmpeg_next::frame::Video::new(
            settings.codec.pixel_format(),
            settings.width,
            settings.height,
        );

        log::info!(
            "video encoder opened: {:?} {}x{} time base {:?}",
            codec_id,
            settings.width,
            settings.height,
            encoder_time_base
        );

        Ok(Self {
            inner: opened,
            time_base: encoder_time_base,
            stream_index: 0,
            frame,
            scaler: None,
            flushed: false,
        })
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn assign_stream(&mut self, index: usize) {
        self.stream_index = index;
    }

    pub fn as_encoder(&self) -> &codec::encoder::Video {
        &self.inner
    }

    /// Encodes one decoded frame and pushes every resulting packet. Packets
    /// are stamped from the originating frame: pts = dts = frame pts, the
    /// frame duration carried over. The pixel format is converted into the
    /// canonical buffer when the source does not match the encoder.
    pub fn encode_frame(
        &mut self,
        mut frame: VideoFrame,
        packets: &StageQueue<EncodedPacket>,
    ) -> anyhow::Result<()> {
        let pts = frame.pts();
        let duration = frame.duration();
        let source = frame.get_mut();

        if source.format() != self.frame.format() {
            if self.scaler.is_none() {
                self.scaler = Some(scaling::Context::get(
                    source.format(),
                    source.width(),
                    source.height(),
                    self.frame.format(),
                    self.frame.width(),
                    self.frame.height(),
                    scaling::flag::Flags::BICUBIC,
                )?);
            }
            self.scaler.as_mut().unwrap().run(source, &mut self.frame)?;
            self.frame.set_pts(pts);
            self.inner.send_frame(&self.frame)?;
        } else {
            source.set_pts(pts);
            self.inner.send_frame(source)?;
        }

        loop {
            match self.receive_packet()? {
                Some(mut packet) => {
                    let p = packet.get_mut();
                    p.set_stream(self.stream_index);
                    p.set_pts(pts);
                    p.set_dts(pts);
                    p.set_duration(duration);
                    packets.push(packet);
                }
                None => return Ok(()),
            }
        }
    }

    /// Drains the encoder after upstream terminated. One-shot per session;
    /// repeat calls are no-ops.
    pub fn flush(&mut self, packets: &StageQueue<EncodedPacket>) -> anyhow::Result<()> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        self.inner.send_eof()?;
        loop {
            match self.receive_packet()? {
                Some(mut packet) => {
                    let p = packet.get_mut();
                    p.set_stream(self.stream_index);
                    let pts = p.pts();
                    p.set_dts(pts);
                    packets.push(packet);
                }
                None => return Ok(()),
            }
        }
    }

    fn receive_packet(&mut self) -> anyhow::Result<Option<EncodedPacket>> {
        let mut packet = codec::packet::Packet::empty();
        match self.inner.receive_packet(&mut packet) {
            Ok(()) => Ok(Some(EncodedPacket::from((packet, self.time_base)))),
            Err(ffmpeg_next::Error::Other { errno })
                if errno == ffmpeg_next::util::error::EAGAIN =>
            {
                Ok(None)
            }
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Uncompressed PCM track, opened only when the session asks for audio.
/// Nothing upstream produces audio frames yet, so in practice this is
/// opened, muxed and flushed empty.
pub struct AudioEncoder {
    inner: codec::encoder::Audio,
    time_base: Rational,
    stream_index: usize,
    flushed: bool,
}

impl AudioEncoder {
    pub const SAMPLE_RATE: i32 = 48_000;

    pub fn open(global_header: bool) -> anyhow::Result<Self> {
        let codec = ffmpeg_next::encoder::find(codec::Id::PCM_S16LE)
            .ok_or_else(|| anyhow::anyhow!("encoder not found: PCM_S16LE"))?;
        let mut encoder = codec::Context::new_with_codec(codec).encoder().audio()?;
        encoder.set_rate(Self::SAMPLE_RATE);
        encoder.set_channel_layout(ChannelLayout::STEREO);
        encoder.set_format(format::Sample::I16(format::sample::Type::Packed));
        encoder.set_time_base(Rational::new(1, Self::SAMPLE_RATE));
        if global_header {
            encoder.set_flags(codec::Flags::GLOBAL_HEADER);
        }
        let opened = encoder.open_with(Dictionary::new())?;
        let encoder_time_base: Rational = unsafe { (*opened.0.as_ptr()).time_base.into() };

        Ok(Self {
            inner: opened,
            time_base: encoder_time_base,
            stream_index: 0,
            flushed: false,
        })
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn assign_stream(&mut self, index: usize) {
        self.stream_index = index;
    }

    pub fn as_encoder(&self) -> &codec::encoder::Audio {
        &self.inner
    }

    pub fn encode_frame(
        &mut self,
        mut frame: AudioFrame,
        packets: &StageQueue<EncodedPacket>,
    ) -> anyhow::Result<()> {
        self.inner.send_frame(frame.get_mut())?;
        self.drain(packets)
    }

    pub fn flush(&mut self, packets: &StageQueue<EncodedPacket>) -> anyhow::Result<()> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        self.inner.send_eof()?;
        self.drain(packets)
    }

    fn drain(&mut self, packets: &StageQueue<EncodedPacket>) -> anyhow::Result<()> {
        loop {
            let mut packet = codec::packet::Packet::empty();
            match self.inner.receive_packet(&mut packet) {
                Ok(()) => {
                    packet.set_stream(self.stream_index);
                    packets.push(EncodedPacket::from((packet, self.time_base)));
                }
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN =>
                {
                    return Ok(());
                }
                Err(ffmpeg_next::Error::Eof) => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Encode stage loop. Keeps running while capture is active or the decode
/// stage still is; once both are done and the frame queue drains, flushes
/// each open encoder exactly once and exits. A frame that fails to encode
/// is logged and dropped.
pub fn run_encode_stage(
    mut video: VideoEncoder,
    mut audio: Option<AudioEncoder>,
    frames: Arc<StageQueue<DecodedFrame>>,
    packets: Arc<StageQueue<EncodedPacket>>,
    shared: Arc<PipelineShared>,
) {
    loop {
        match frames.try_pop() {
            Some(DecodedFrame::Video(frame)) => {
                if let Err(e) = video.encode_frame(frame, &packets) {
                    log::error!("video encode error, frame dropped: {:#}", e);
                }
            }
            Some(DecodedFrame::Audio(frame)) => match audio.as_mut() {
                Some(encoder) => {
                    if let Err(e) = encoder.encode_frame(frame, &packets) {
                        log::error!("audio encode error, frame dropped: {:#}", e);
                    }
                }
                None => log::warn!("audio frame arrived with no audio track, dropped"),
            },
            None => {
                if !shared.capture_active() && !shared.decode_running() {
                    break;
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
    }

    if let Err(e) = video.flush(&packets) {
        log::error!("video encoder flush error: {:#}", e);
    }
    if let Some(encoder) = audio.as_mut() {
        if let Err(e) = encoder.flush(&packets) {
            log::error!("audio encoder flush error: {:#}", e);
        }
    }

    shared.set_encode_running(false);
    log::info!("encode stage finished, {} packet(s) queued", packets.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings() -> Settings {
        Settings {
            width: 320,
            height: 240,
            codec: VideoCodec::ProRes,
            time_base: Rational::new(1, 25),
        }
    }

    fn uyvy_frame(width: u32, height: u32, pts: i64, duration: i64) -> VideoFrame {
        let mut raw = ffmpeg_next::frame::Video::new(Pixel::UYVY422, width, height);
        for byte in raw.data_mut(0).iter_mut() {
            *byte = 0x80;
        }
        let mut frame = VideoFrame::from(raw);
        frame.set_pts(Some(pts));
        frame.set_duration(duration);
        frame
    }

    #[test]
    fn packets_carry_source_frame_timestamps() -> anyhow::Result<()> {
        crate::init()?;
        let mut encoder = VideoEncoder::open(&test_settings(), false)?;
        encoder.assign_stream(0);
        let packets = StageQueue::new();

        encoder.encode_frame(uyvy_frame(320, 240, 7, 1), &packets)?;
        encoder.flush(&packets)?;

        let mut seen = 0;
        while let Some(packet) = packets.try_pop() {
            assert_eq!(packet.pts(), Some(7));
            assert_eq!(packet.dts(), Some(7));
            assert_eq!(packet.index(), 0);
            seen += 1;
        }
        assert!(seen >= 1, "encoder should emit at least one packet");
        Ok(())
    }

    #[test]
    fn every_packet_traces_to_its_source_frame() -> anyhow::Result<()> {
        crate::init()?;
        let mut encoder = VideoEncoder::open(&test_settings(), false)?;
        encoder.assign_stream(0);
        let packets = StageQueue::new();

        // more frames than the encoder has worker threads, so any internal
        // frame buffering would surface as misstamped or reordered packets
        for pts in 0..10i64 {
            encoder.encode_frame(uyvy_frame(320, 240, pts, 1), &packets)?;
        }
        encoder.flush(&packets)?;

        let mut stamped = Vec::new();
        while let Some(packet) = packets.try_pop() {
            assert_eq!(packet.dts(), packet.pts());
            assert_eq!(packet.duration(), 1);
            stamped.push(packet.pts().unwrap());
        }
        assert_eq!(stamped, (0..10).collect::<Vec<i64>>());
        Ok(())
    }

    #[test]
    fn flush_is_one_shot() -> anyhow::Result<()> {
        crate::init()?;
        let mut encoder = VideoEncoder::open(&test_settings(), false)?;
        let packets = StageQueue::new();

        encoder.flush(&packets)?;
        let after_first = packets.len();
        encoder.flush(&packets)?;
        assert_eq!(packets.len(), after_first);
        Ok(())
    }

    #[test]
    fn audio_flush_on_empty_track_is_clean() -> anyhow::Result<()> {
        crate::init()?;
        let mut encoder = AudioEncoder::open(false)?;
        let packets = StageQueue::new();
        encoder.flush(&packets)?;
        encoder.flush(&packets)?;
        assert!(packets.is_empty());
        Ok(())
    }
}
