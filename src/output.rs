use std::sync::{Arc, Mutex};
use std::thread;

use ffmpeg_next::Rational;
use tokio_util::sync::CancellationToken;

use crate::encoder::{AudioEncoder, VideoEncoder};
use crate::packet::EncodedPacket;
use crate::queue::StageQueue;
use crate::recorder::{PipelineShared, POLL_INTERVAL};

/// The container being written. The format is guessed from the destination
/// path's extension; opening fails when the path cannot be created, which
/// is the init-time error surface for bad destinations.
pub struct RecordOutput {
    inner: ffmpeg_next::format::context::Output,
    destination: String,
    have_written_header: bool,
    have_written_trailer: bool,
}

impl RecordOutput {
    pub fn create(destination: &str) -> anyhow::Result<Self> {
        let output = ffmpeg_next::format::output(destination)?;
        Ok(Self {
            inner: output,
            destination: destination.to_string(),
            have_written_header: false,
            have_written_trailer: false,
        })
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// True when the muxer wants codec parameters out of band instead of
    /// in-stream. No safe accessor for the oformat flags.
    pub fn needs_global_header(&self) -> bool {
        unsafe {
            let oformat = (*self.inner.as_ptr()).oformat;
            !oformat.is_null()
                && ((*oformat).flags & ffmpeg_next::ffi::AVFMT_GLOBALHEADER as i32) != 0
        }
    }

    pub fn add_video_stream(&mut self, encoder: &VideoEncoder) -> anyhow::Result<usize> {
        let codec = encoder
            .as_encoder()
            .codec()
            .ok_or_else(|| anyhow::anyhow!("video encoder has no codec"))?;
        let mut stream = self.inner.add_stream(codec)?;
        stream.set_parameters(encoder.as_encoder());
        stream.set_time_base(encoder.time_base());
        Ok(stream.index())
    }

    pub fn add_audio_stream(&mut self, encoder: &AudioEncoder) -> anyhow::Result<usize> {
        let codec = encoder
            .as_encoder()
            .codec()
            .ok_or_else(|| anyhow::anyhow!("audio encoder has no codec"))?;
        let mut stream = self.inner.add_stream(codec)?;
        stream.set_parameters(encoder.as_encoder());
        stream.set_time_base(encoder.time_base());
        Ok(stream.index())
    }

    pub fn write_header(&mut self) -> anyhow::Result<()> {
        if !self.have_written_header {
            self.inner.write_header()?;
            self.have_written_header = true;
        }
        Ok(())
    }

    /// Rescales the packet into the container stream's time base and hands
    /// it to the interleaving muxer.
    pub fn write_packet(&mut self, mut packet: EncodedPacket) -> anyhow::Result<()> {
        if !self.have_written_header {
            anyhow::bail!("header not written");
        }
        let source_time_base = packet.time_base();
        let stream_time_base: Rational = self
            .inner
            .stream(packet.index())
            .ok_or_else(|| anyhow::anyhow!("no output stream at index {}", packet.index()))?
            .time_base();

        let p = packet.get_mut();
        p.set_position(-1);
        p.rescale_ts(source_time_base, stream_time_base);
        p.write_interleaved(&mut self.inner)?;
        Ok(())
    }

    /// Writes the trailer and releases the file. Safe to call any number of
    /// times; only the first call after a written header does anything.
    pub fn finish(&mut self) -> anyhow::Result<()> {
        if self.have_written_header && !self.have_written_trailer {
            self.have_written_trailer = true;
            self.inner.write_trailer()?;
        }
        Ok(())
    }
}

/// Write stage loop. Keeps running while capture is active or the encode
/// stage still is. Once both are done and the packet queue drains, it
/// finalizes the container and signals session shutdown. A packet that
/// fails to write is logged and lost, never fatal.
pub fn run_write_stage(
    output: Arc<Mutex<RecordOutput>>,
    packets: Arc<StageQueue<EncodedPacket>>,
    shared: Arc<PipelineShared>,
    shutdown: CancellationToken,
) {
    loop {
        match packets.try_pop() {
            Some(packet) => {
                let mut output = output.lock().unwrap();
                if let Err(e) = output.write_packet(packet) {
                    log::error!("write packet error, packet lost: {:#}", e);
                }
            }
            None => {
                if !shared.capture_active() && !shared.encode_running() {
                    break;
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
    }

    {
        let mut output = output.lock().unwrap();
        if let Err(e) = output.finish() {
            log::error!("output finalize error: {:#}", e);
        } else {
            log::info!("recording finalized: {}", output.destination());
        }
    }
    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unopenable_destination_fails_at_create() {
        crate::init().unwrap();
        let result = RecordOutput::create("/nonexistent-dir-for-sure/out.mov");
        assert!(result.is_err());
    }

    #[test]
    fn finish_before_header_is_a_no_op() -> anyhow::Result<()> {
        crate::init()?;
        let path = std::env::temp_dir().join(format!("finish-noop-{}.mov", std::process::id()));
        let mut output = RecordOutput::create(path.to_str().unwrap())?;
        // no header yet, so no trailer either
        output.finish()?;
        output.finish()?;
        let _ = std::fs::remove_file(&path);
        Ok(())
    }
}
