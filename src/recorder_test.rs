use std::time::Duration;

use ffmpeg_next::Rational;
use ffmpeg_next::codec;
use ffmpeg_next::format::Pixel;

use super::*;
use crate::capture::{CaptureFrame, DisplayMode, TestPatternSource};

fn test_mode() -> DisplayMode {
    DisplayMode {
        width: 320,
        height: 240,
        time_base: Rational::new(1, 25),
        pixel_format: Pixel::UYVY422,
    }
}

fn test_config(tag: &str) -> RecordConfig {
    let destination = std::env::temp_dir()
        .join(format!("sdi-recorder-{}-{}.mov", tag, std::process::id()))
        .to_string_lossy()
        .into_owned();
    let _ = std::fs::remove_file(&destination);
    RecordConfig::from_mode(destination, test_mode())
}

fn verify_recording(
    path: &str,
    expected_streams: u32,
    expected_video_packets: u32,
) -> anyhow::Result<()> {
    let size = std::fs::metadata(path)?.len();
    assert!(size > 0, "recording should not be empty");

    let mut input = ffmpeg_next::format::input(path)
        .map_err(|e| anyhow::anyhow!("recording should open without error: {}", e))?;
    assert_eq!(input.nb_streams(), expected_streams);

    let video_stream = input
        .stream(0)
        .ok_or_else(|| anyhow::anyhow!("recording should have a video stream"))?;
    assert_eq!(video_stream.parameters().id(), codec::Id::PRORES);

    let mut packet_count: u32 = 0;
    for (stream, _packet) in input.packets() {
        if stream.index() == 0 {
            packet_count += 1;
        }
    }
    assert_eq!(packet_count, expected_video_packets);
    Ok(())
}

#[tokio::test]
async fn records_frames_to_a_valid_container() -> anyhow::Result<()> {
    crate::init()?;
    let config = test_config("e2e");
    let destination = config.destination.clone();

    let mut recorder = Recorder::new(config);
    recorder.init(Rational::new(1, 25))?;
    recorder.start()?;

    let callback = recorder.callback()?;
    let source = TestPatternSource::new(test_mode());
    for i in 0..3i64 {
        let data = source.frame_data(i as u64);
        callback.video_frame_arrived(CaptureFrame {
            data: &data,
            stream_time: i,
            duration: 1,
            has_signal: true,
        });
    }

    recorder.stop().await?;
    recorder.clean_up()?;
    // second clean_up must not rewrite the trailer
    recorder.clean_up()?;
    assert_eq!(recorder.state(), State::Cleaned);

    verify_recording(&destination, 1, 3)?;
    std::fs::remove_file(&destination)?;
    Ok(())
}

#[tokio::test]
async fn init_failure_leaves_recorder_safe() -> anyhow::Result<()> {
    crate::init()?;
    let mut config = test_config("badpath");
    config.destination = "/nonexistent-dir-for-sure/out.mov".to_string();

    let mut recorder = Recorder::new(config);
    assert!(recorder.init(Rational::new(1, 25)).is_err());
    assert_eq!(recorder.state(), State::Created);
    assert!(recorder.start().is_err());

    recorder.clean_up()?;
    recorder.clean_up()?;
    assert_eq!(recorder.state(), State::Cleaned);
    Ok(())
}

#[tokio::test]
async fn no_signal_samples_are_discarded() -> anyhow::Result<()> {
    crate::init()?;
    let config = test_config("nosignal");
    let destination = config.destination.clone();

    let mut recorder = Recorder::new(config);
    recorder.init(Rational::new(1, 25))?;
    recorder.start()?;

    let callback = recorder.callback()?;
    for i in 0..5i64 {
        callback.video_frame_arrived(CaptureFrame {
            data: &[],
            stream_time: i,
            duration: 1,
            has_signal: false,
        });
    }
    assert_eq!(recorder.sample_count(), 5);
    assert!(recorder.units.is_empty());

    recorder.stop().await?;
    recorder.clean_up()?;
    verify_recording(&destination, 1, 0)?;
    std::fs::remove_file(&destination)?;
    Ok(())
}

#[tokio::test]
async fn sample_cap_deactivates_capture() -> anyhow::Result<()> {
    crate::init()?;
    let config = test_config("cap");
    let destination = config.destination.clone();

    let mut recorder = Recorder::new(config);
    recorder.init(Rational::new(1, 25))?;
    recorder.start()?;

    let callback = recorder.callback()?;
    for i in 0..MAX_CAPTURE_SAMPLES as i64 {
        callback.video_frame_arrived(CaptureFrame {
            data: &[],
            stream_time: i,
            duration: 1,
            has_signal: false,
        });
    }
    assert!(recorder.is_capture_active());

    callback.video_frame_arrived(CaptureFrame {
        data: &[],
        stream_time: MAX_CAPTURE_SAMPLES as i64,
        duration: 1,
        has_signal: false,
    });
    assert!(!recorder.is_capture_active());
    assert!(recorder.units.is_empty());

    recorder.stop().await?;
    recorder.clean_up()?;
    std::fs::remove_file(&destination)?;
    Ok(())
}

#[tokio::test]
async fn write_stage_waits_for_capture_to_end() -> anyhow::Result<()> {
    crate::init()?;
    let config = test_config("liveness");
    let destination = config.destination.clone();

    let mut recorder = Recorder::new(config);
    recorder.init(Rational::new(1, 25))?;
    recorder.start()?;

    // idle pipeline with capture active: every stage must keep polling
    tokio::time::sleep(Duration::from_millis(100)).await;
    {
        let stages = recorder.stages.as_ref().unwrap();
        assert!(!stages.decode.is_finished());
        assert!(!stages.encode.is_finished());
        assert!(!stages.write.is_finished());
    }

    let shutdown = recorder.shutdown_token();
    assert!(!shutdown.is_cancelled());
    recorder.stop().await?;
    assert!(shutdown.is_cancelled());

    recorder.clean_up()?;
    std::fs::remove_file(&destination)?;
    Ok(())
}

#[tokio::test]
async fn optional_audio_track_is_muxed() -> anyhow::Result<()> {
    crate::init()?;
    let mut config = test_config("audio");
    config.record_audio = true;
    let destination = config.destination.clone();

    let mut recorder = Recorder::new(config);
    recorder.init(Rational::new(1, 25))?;
    recorder.start()?;

    let callback = recorder.callback()?;
    let source = TestPatternSource::new(test_mode());
    for i in 0..2i64 {
        let data = source.frame_data(i as u64);
        callback.video_frame_arrived(CaptureFrame {
            data: &data,
            stream_time: i,
            duration: 1,
            has_signal: true,
        });
    }

    recorder.stop().await?;
    recorder.clean_up()?;
    verify_recording(&destination, 2, 2)?;
    std::fs::remove_file(&destination)?;
    Ok(())
}
