use std::sync::Arc;
use std::time::Duration;

use ffmpeg_next::Rational;
use ffmpeg_next::format::Pixel;

/// The negotiated capture mode. The frame rate rational is adopted verbatim
/// as the encode time base for the whole session.
#[derive(Debug, Clone, Copy)]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    pub time_base: Rational,
    pub pixel_format: Pixel,
}

impl DisplayMode {
    pub fn hd1080p50() -> Self {
        Self {
            width: 1920,
            height: 1080,
            time_base: Rational::new(1, 50),
            pixel_format: Pixel::UYVY422,
        }
    }

    pub fn hd1080p25() -> Self {
        Self {
            width: 1920,
            height: 1080,
            time_base: Rational::new(1, 25),
            pixel_format: Pixel::UYVY422,
        }
    }

    pub fn frame_interval(&self) -> Duration {
        let num = self.time_base.numerator().max(1) as u64;
        let den = self.time_base.denominator().max(1) as u64;
        Duration::from_micros(1_000_000 * num / den)
    }
}

/// One sample as delivered by the capture hardware. `stream_time` and
/// `duration` are ticks at the denominator scale of the mode's time base.
pub struct CaptureFrame<'a> {
    pub data: &'a [u8],
    pub stream_time: i64,
    pub duration: i64,
    pub has_signal: bool,
}

/// Capture-facing delegate. The driver thread calls in; implementations must
/// return quickly and never block on downstream stages.
pub trait InputCallback: Send + Sync {
    fn video_frame_arrived(&self, frame: CaptureFrame<'_>);
    fn display_mode_changed(&self, mode: DisplayMode);
}

/// Deviceless capture source. Synthesizes UYVY422 frames at the mode's rate
/// and drives an `InputCallback` the way a real card would.
pub struct TestPatternSource {
    mode: DisplayMode,
}

impl TestPatternSource {
    pub fn new(mode: DisplayMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    /// UYVY422 buffer with a moving luma ramp and neutral chroma.
    pub fn frame_data(&self, index: u64) -> Vec<u8> {
        let width = self.mode.width as usize;
        let height = self.mode.height as usize;
        let mut data = vec![0u8; width * height * 2];
        for (i, byte) in data.iter_mut().enumerate() {
            // byte layout per pixel pair: U0 Y0 V0 Y1
            *byte = match i % 4 {
                0 | 2 => 0x80,
                _ => ((i / 4 + index as usize) % 220) as u8 + 16,
            };
        }
        data
    }

    pub async fn run(&self, callback: Arc<dyn InputCallback>, frames: u64) {
        callback.display_mode_changed(self.mode);
        let num = self.mode.time_base.numerator().max(1) as i64;
        let interval = self.mode.frame_interval();
        for i in 0..frames as i64 {
            let data = self.frame_data(i as u64);
            callback.video_frame_arrived(CaptureFrame {
                data: &data,
                stream_time: i * num,
                duration: num,
                has_signal: true,
            });
            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_matches_mode_dimensions() {
        let source = TestPatternSource::new(DisplayMode {
            width: 64,
            height: 8,
            time_base: Rational::new(1, 25),
            pixel_format: Pixel::UYVY422,
        });
        let data = source.frame_data(0);
        assert_eq!(data.len(), 64 * 8 * 2);
        // chroma bytes sit at offsets 0 and 2 of every 4-byte group
        assert_eq!(data[0], 0x80);
        assert_eq!(data[2], 0x80);
    }

    #[test]
    fn frame_interval_follows_time_base() {
        let mode = DisplayMode::hd1080p50();
        assert_eq!(mode.frame_interval(), Duration::from_micros(20_000));
    }
}
