//! Compute role: own the accelerator, serve the stream, wait for shutdown.

use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use accel_core::{stub::StubDevice, DetectionThreshold, SessionManager};
use stream_core::{
    sidecar::{AppCommEndpoint, DEFAULT_WAKEUP_TARGET},
    spawn_server, ComputeStreamService, ServiceConfig,
};

use crate::{cli::ComputeArgs, config};

const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

pub fn run(args: ComputeArgs) -> Result<()> {
    let config = config::load(&args.config);

    let threshold = std::env::var("DETECTION_THRESHOLD")
        .ok()
        .and_then(|raw| raw.parse::<f32>().ok())
        .unwrap_or(config.threshold);
    let threshold = Arc::new(DetectionThreshold::new(threshold));

    let hef_path = args
        .hef
        .or_else(|| std::env::var("HEF_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("models/best.hef"));

    let sessions = Arc::new(SessionManager::new());
    sessions
        .init(&hef_path, StubDevice::create)
        .with_context(|| format!("accelerator init failed for {}", hef_path.display()))?;

    let port = args
        .port
        .or_else(|| {
            std::env::var("GRPC_PORT")
                .ok()
                .and_then(|raw| raw.parse::<u16>().ok())
        })
        .unwrap_or(50051);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let shutdown = CancellationToken::new();
    let handler_shutdown = shutdown.clone();
    if let Err(err) = ctrlc::set_handler(move || handler_shutdown.cancel()) {
        warn!(%err, "failed to install signal handler");
    }

    let forward_target = std::env::var("FORWARD_TARGET").ok();
    let service_config = ServiceConfig {
        device_id: config.device_id.clone(),
        lowlight_graph: std::env::var("LOWLIGHT_HEF_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("models/zero_dce_pp.hef")),
        wakeup_target: Some(
            std::env::var("WAKEUP_TARGET").unwrap_or_else(|_| DEFAULT_WAKEUP_TARGET.to_string()),
        ),
        forward_target: forward_target.clone(),
    };

    let service = ComputeStreamService::new(
        sessions.clone(),
        threshold,
        service_config,
        shutdown.clone(),
    );
    let app_comm = AppCommEndpoint::new(forward_target);

    let mut server = spawn_server(addr, service, app_comm, shutdown.clone())
        .with_context(|| format!("failed to start server on {addr}"))?;
    info!(addr = %server.local_addr(), device = %config.device_id, "compute node ready");

    while !shutdown.is_cancelled() {
        thread::sleep(SHUTDOWN_POLL);
    }

    info!("termination requested; shutting down");
    let _ = server.shutdown();
    sessions.cleanup();
    Ok(())
}
