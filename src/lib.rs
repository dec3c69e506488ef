#![allow(dead_code)]

/// Registers FFmpeg components (codecs, muxers, etc.). Call once at startup
/// before opening any decode or encode context.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub mod capture;
pub mod decoder;
pub mod encoder;
pub mod frame;
pub mod output;
pub mod packet;
pub mod queue;
pub mod recorder;
