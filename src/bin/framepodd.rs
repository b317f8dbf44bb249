//! framepodd - camera pod daemon
//!
//! Wires the frame pipeline together and runs it until interrupted:
//!
//! 1. Loads configuration (file, environment, command line).
//! 2. Starts the encoder worker pool and the upload session driver.
//! 3. Feeds frames from the capture source into the pipeline.
//!
//! Sessions restart transparently after any transport failure; Ctrl-C
//! requests a cooperative shutdown of every thread.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

use framepod::{
    EncoderPool, FrameStore, Pipeline, PodConfig, SessionState, SyntheticSource, UploadConfig,
    UploadDriver,
};

#[derive(Parser, Debug)]
#[command(name = "framepodd", version, about = "Camera pod capture-to-upload daemon")]
struct Args {
    /// Camera identifier reported to the base station (e.g. cam1, cam2).
    #[arg(long)]
    identifier: Option<String>,

    /// Base URL frames are posted to.
    #[arg(long)]
    url: Option<String>,

    /// Sensor profile name (standard, wide).
    #[arg(long)]
    profile: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = PodConfig::load()?;
    cfg.apply_overrides(args.identifier, args.url, args.profile)?;

    log::info!(
        "framepodd {} starting: identifier={} url={} capture={}x{}@{} output={}x{}",
        env!("CARGO_PKG_VERSION"),
        cfg.identifier,
        cfg.base_url,
        cfg.profile.capture_width,
        cfg.profile.capture_height,
        cfg.profile.frame_rate,
        cfg.profile.output_width,
        cfg.profile.output_height,
    );

    let state = Arc::new(SessionState::new());
    let store = Arc::new(FrameStore::new());

    let pool = EncoderPool::start(cfg.profile.clone(), Arc::clone(&store), Arc::clone(&state));
    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&state),
        Arc::clone(pool.table()),
        cfg.profile.frame_len(),
    ));

    {
        let state = Arc::clone(&state);
        let store = Arc::clone(&store);
        let table = Arc::clone(pool.table());
        ctrlc::set_handler(move || {
            log::info!("shutdown requested");
            state.stop();
            store.notify_all();
            table.notify_all();
        })
        .context("install signal handler")?;
    }

    let uploader = {
        let driver = UploadDriver::new(
            UploadConfig {
                base_url: cfg.base_url.clone(),
                identifier: cfg.identifier.clone(),
            },
            Arc::clone(&state),
            Arc::clone(&store),
        );
        std::thread::Builder::new()
            .name("uploader".into())
            .spawn(move || driver.run())
            .context("spawn upload driver")?
    };

    let health = {
        let state = Arc::clone(&state);
        let pipeline = Arc::clone(&pipeline);
        std::thread::Builder::new()
            .name("health".into())
            .spawn(move || {
                while state.running() {
                    std::thread::sleep(Duration::from_secs(5));
                    log::info!(
                        "health: latest_position={} pool_drops={} sensor_drops={}",
                        state.latest_position(),
                        pipeline.dropped_frames(),
                        pipeline.sensor_drops(),
                    );
                }
            })
            .context("spawn health logger")?
    };

    // No hardware driver is wired in this build; the synthetic source
    // stands in for the camera and blocks until shutdown.
    let mut source = SyntheticSource::new(&cfg.profile);
    source.run(&pipeline, &state);

    if uploader.join().is_err() {
        log::error!("upload driver panicked");
    }
    pool.shutdown();
    let _ = health.join();

    log::info!("framepodd stopped");
    Ok(())
}
