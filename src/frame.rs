use bytes::Bytes;

pub enum DecodedFrame {
    Video(VideoFrame),
    Audio(AudioFrame),
}

pub struct VideoFrame {
    frame: ffmpeg_next::frame::Video,
}

impl From<ffmpeg_next::frame::Video> for VideoFrame {
    fn from(frame: ffmpeg_next::frame::Video) -> Self {
        Self { frame }
    }
}

impl VideoFrame {
    pub fn width(&self) -> u32 {
        self.frame.width()
    }

    pub fn height(&self) -> u32 {
        self.frame.height()
    }

    pub fn format(&self) -> ffmpeg_next::format::Pixel {
        self.frame.format()
    }

    pub fn pts(&self) -> Option<i64> {
        self.frame.pts()
    }

    pub fn set_pts(&mut self, pts: Option<i64>) {
        self.frame.set_pts(pts);
    }

    /// No safe accessor for AVFrame.duration in this binding.
    pub fn duration(&self) -> i64 {
        unsafe { (*self.frame.as_ptr()).duration }
    }

    pub fn set_duration(&mut self, duration: i64) {
        unsafe {
            (*self.frame.as_mut_ptr()).duration = duration;
        }
    }

    pub fn is_key(&self) -> bool {
        self.frame.is_key()
    }

    pub fn data(&self) -> Bytes {
        Bytes::copy_from_slice(self.frame.data(0))
    }

    pub fn get_mut(&mut self) -> &mut ffmpeg_next::frame::Video {
        &mut self.frame
    }

    pub fn as_video(&self) -> &ffmpeg_next::frame::Video {
        &self.frame
    }
}

pub struct AudioFrame {
    frame: ffmpeg_next::frame::Audio,
}

impl From<ffmpeg_next::frame::Audio> for AudioFrame {
    fn from(frame: ffmpeg_next::frame::Audio) -> Self {
        Self { frame }
    }
}

impl AudioFrame {
    pub fn pts(&self) -> Option<i64> {
        self.frame.pts()
    }

    pub fn format(&self) -> ffmpeg_next::format::Sample {
        self.frame.format()
    }

    pub fn rate(&self) -> u32 {
        self.frame.rate()
    }

    pub fn get_mut(&mut self) -> &mut ffmpeg_next::frame::Audio {
        &mut self.frame
    }

    pub fn as_audio(&self) -> &ffmpeg_next::frame::Audio {
        &self.frame
    }
}
