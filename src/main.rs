//! Argus camera -> inference -> display pipeline on simulated hardware

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use argus::capture::{SimulatedIsp, StreamType};
use argus::display::SimulatedDisplay;
use argus::inference::{BrightSpotDetector, ResultPublisher};
use argus::pipeline::{Pipeline, StreamController, StreamGovernor, StreamTiming, SystemEvents};
use argus::{utils, Config};
use color_eyre::{eyre::eyre, Result};
use tracing::{error, info, warn};

/// Refresh period of the simulated panel
const SCANOUT_PERIOD: Duration = Duration::from_millis(2);
const DETECTOR_CELL: u32 = 8;
const DETECTOR_THRESHOLD: u8 = 160;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("argus=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Argus Launching...");

    // Load configuration
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    argus::CONFIG.store(Arc::new(config.clone()));

    // Display surface and its interrupt source
    let surface = Arc::new(SimulatedDisplay::new());
    let (publisher, results) = ResultPublisher::channel(config.pipeline.publish_queue_depth);
    let engine = BrightSpotDetector::new(
        DETECTOR_CELL,
        DETECTOR_THRESHOLD,
        config.inference.max_frame_width,
        config.inference.max_frame_height,
    );
    let pipeline = Pipeline::new(&config, surface.clone(), engine, Some(publisher))?;

    let irq = pipeline.interrupt_line();
    let mut scanout = surface.spawn_scanout(SCANOUT_PERIOD, move || irq.handle());

    // Stand-in for the message broker connection
    let publisher_task = tokio::spawn(async move {
        while let Ok(summary) = results.recv_async().await {
            info!(target: "argus::publish", "Publishing: {}", summary);
        }
    });

    let events = Arc::new(SystemEvents::new());
    let governor = Arc::new(StreamGovernor::new(config.pipeline.stream_enabled));
    #[cfg(unix)]
    reload_on_hangup(config_path.clone(), governor.clone())?;

    // ISP thread owns the pipeline until the capture trigger goes away
    let state = pipeline.state();
    let consumed = pipeline.consumed();
    let (trigger, isp) = SimulatedIsp::new(&config.capture).spawn(pipeline)?;

    let controller = StreamController::new(
        trigger,
        events.clone(),
        consumed,
        governor,
        state,
        StreamTiming::from_config(&config.pipeline),
    );
    let pin_to_core = config.pipeline.pin_to_core;
    let controller = thread::Builder::new()
        .name("stream".into())
        .spawn(move || {
            if let Some(core) = pin_to_core {
                utils::pin_current_thread(core);
            }
            controller.run()
        })?;
    events.request_start();

    let run_for = async {
        match config.pipeline.run_for_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Interrupted");
        }
        _ = run_for => info!("Run time elapsed"),
    }

    events.request_stop();
    let triggered = tokio::task::spawn_blocking(move || controller.join())
        .await?
        .map_err(|_| eyre!("stream controller panicked"))?;
    let mut pipeline = tokio::task::spawn_blocking(move || isp.join())
        .await?
        .map_err(|_| eyre!("ISP thread panicked"))?;

    if let Some(path) = &config.pipeline.snapshot_path {
        match pipeline.displayed_frame() {
            Some(frame) => {
                if let Err(e) = utils::save_snapshot(&frame, path) {
                    error!("Failed to write snapshot: {}", e);
                }
            }
            None => warn!("Nothing on screen, no snapshot written"),
        }

        let gray = pipeline.gate().last_grayscale();
        if !gray.data.is_empty() {
            match utils::save_gray_snapshot(&gray, &path.with_extension("gray.png")) {
                Ok((min, max)) => info!("Last inference input gray range {}..={}", min, max),
                Err(e) => error!("Failed to write inference input snapshot: {}", e),
            }
        }
    }

    pipeline.shutdown();
    scanout.stop();

    for stream in [StreamType::FullResolution, StreamType::Downscaled] {
        let stats = pipeline.source().stats(stream);
        info!(
            "{} pool: {} acquired, {} released, {} reused while held",
            stream, stats.acquired, stats.released, stats.reused_while_held
        );
    }

    // Dropping the pipeline closes the result queue
    drop(pipeline);
    publisher_task.await?;

    info!("Argus shutting down after {} triggers", triggered);
    Ok(())
}

/// SIGHUP reloads the configuration; only `pipeline.stream_enabled` applies
/// without a restart.
#[cfg(unix)]
fn reload_on_hangup(path: Option<PathBuf>, governor: Arc<StreamGovernor>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            match Config::load(path.as_deref()) {
                Ok(config) => {
                    let current = argus::CONFIG.load();
                    if current.capture != config.capture
                        || current.display != config.display
                        || current.inference != config.inference
                    {
                        warn!("Frame geometry and overlay changes need a restart");
                    }
                    governor.set_enabled(config.pipeline.stream_enabled);
                    info!(
                        "Configuration reloaded, streaming enabled: {}",
                        config.pipeline.stream_enabled
                    );
                    argus::CONFIG.store(Arc::new(config));
                }
                Err(e) => warn!("Keeping current configuration: {}", e),
            }
        }
    });
    Ok(())
}
