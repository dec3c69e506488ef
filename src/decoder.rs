use std::sync::Arc;
use std::thread;

use ffmpeg_next::Rational;
use ffmpeg_next::codec;
use ffmpeg_next::format::Pixel;

use crate::frame::{DecodedFrame, VideoFrame};
use crate::packet::RawUnit;
use crate::queue::StageQueue;
use crate::recorder::{PipelineShared, POLL_INTERVAL};

/// Decode context for the raw capture stream. The capture mode fixes the
/// dimensions, pixel format and time base before the context opens.
pub struct Decoder {
    inner: codec::decoder::Video,
    time_base: Rational,
}

impl Decoder {
    pub fn new(
        codec_id: codec::Id,
        pixel_format: Pixel,
        width: u32,
        height: u32,
        time_base: Rational,
    ) -> anyhow::Result<Self> {
        let codec = ffmpeg_next::decoder::find(codec_id)
            .ok_or_else(|| anyhow::anyhow!("decoder not found: {:?}", codec_id))?;
        let mut decoder_ctx = codec::Context::new_with_codec(codec);
        // No safe setters for these on an unopened decode context.
        unsafe {
            let raw = decoder_ctx.as_mut_ptr();
            (*raw).width = width as i32;
            (*raw).height = height as i32;
            (*raw).pix_fmt = pixel_format.into();
            (*raw).time_base = time_base.into();
        }
        let video_decoder = decoder_ctx.decoder().video()?;
        Ok(Self {
            inner: video_decoder,
            time_base,
        })
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn send_unit(&mut self, mut unit: RawUnit) -> anyhow::Result<()> {
        let source_time_base = unit.time_base();
        let packet = unit.get_mut();
        packet.rescale_ts(source_time_base, self.time_base);
        self.inner.send_packet(packet)?;
        Ok(())
    }

    pub fn send_eof(&mut self) -> anyhow::Result<()> {
        self.inner.send_eof()?;
        Ok(())
    }

    pub fn receive_frame(&mut self) -> anyhow::Result<Option<DecodedFrame>> {
        let mut frame = ffmpeg_next::frame::Video::empty();
        match self.inner.receive_frame(&mut frame) {
            Ok(()) => Ok(Some(DecodedFrame::Video(VideoFrame::from(frame)))),
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(ffmpeg_next::Error::Other { errno })
                if errno == ffmpeg_next::util::error::EAGAIN =>
            {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn drain_decoder(decoder: &mut Decoder, frames: &StageQueue<DecodedFrame>) {
    loop {
        match decoder.receive_frame() {
            Ok(Some(frame)) => frames.push(frame),
            Ok(None) => break,
            Err(e) => {
                log::error!("receive frame error: {:#}", e);
                break;
            }
        }
    }
}

/// Decode stage loop. Dequeues raw samples while capture is active or the
/// queue still holds work; an empty queue with capture inactive is terminal.
/// A sample that fails to decode is logged and dropped, never fatal.
pub fn run_decode_stage(
    mut decoder: Decoder,
    units: Arc<StageQueue<RawUnit>>,
    frames: Arc<StageQueue<DecodedFrame>>,
    shared: Arc<PipelineShared>,
) {
    loop {
        match units.try_pop() {
            Some(unit) => {
                if let Err(e) = decoder.send_unit(unit) {
                    log::error!("decode send error, sample dropped: {:#}", e);
                    continue;
                }
                drain_decoder(&mut decoder, &frames);
            }
            None => {
                if !shared.capture_active() {
                    break;
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
    }

    if let Err(e) = decoder.send_eof() {
        log::error!("decoder send eof error: {:#}", e);
    }
    drain_decoder(&mut decoder, &frames);

    shared.set_decode_running(false);
    log::info!("decode stage finished, {} frame(s) queued", frames.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rawvideo_unit_decodes_with_timestamps_intact() -> anyhow::Result<()> {
        crate::init()?;
        let time_base = Rational::new(1, 25);
        let mut decoder = Decoder::new(codec::Id::RAWVIDEO, Pixel::UYVY422, 64, 8, time_base)?;

        let data = vec![0x80u8; 64 * 8 * 2];
        let unit = RawUnit::from_capture(&data, 3, 1, time_base, 0);
        decoder.send_unit(unit)?;

        let frame = decoder
            .receive_frame()?
            .ok_or_else(|| anyhow::anyhow!("expected a decoded frame"))?;
        let DecodedFrame::Video(frame) = frame else {
            anyhow::bail!("expected a video frame");
        };
        assert_eq!(frame.width(), 64);
        assert_eq!(frame.height(), 8);
        assert_eq!(frame.pts(), Some(3));
        Ok(())
    }
}
