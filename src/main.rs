use sdi_recorder::capture::{DisplayMode, TestPatternSource};
use sdi_recorder::recorder::{RecordConfig, Recorder};

#[tokio::main]
async fn main() {
    env_logger::init();
    if let Err(e) = run().await {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    sdi_recorder::init()?;

    let destination = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/tmp/recording.mov".to_string());
    let frames: u64 = std::env::args()
        .nth(2)
        .map(|v| v.parse())
        .transpose()?
        .unwrap_or(250);

    let mode = DisplayMode::hd1080p50();
    let mut recorder = Recorder::new(RecordConfig::from_mode(destination, mode));
    if let Err(e) = recorder.init(mode.time_base) {
        recorder.clean_up()?;
        return Err(e);
    }
    recorder.start()?;

    let callback = recorder.callback()?;
    let source = TestPatternSource::new(mode);
    let shutdown = recorder.shutdown_token();

    tokio::select! {
        _ = source.run(callback, frames) => {
            log::info!("capture source finished after {} frame(s)", frames);
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("interrupt received, stopping");
        }
        _ = shutdown.cancelled() => {
            log::info!("pipeline signalled shutdown");
        }
    }

    recorder.stop().await?;
    recorder.clean_up()?;
    Ok(())
}
