//! Presenter role: source frames, stream them to the compute peer, and
//! drain detection and remote-frame queues for display.
//!
//! Window display is an external concern; runtime keys arrive on stdin
//! instead of window focus (`w` starts streaming and fires the wake-up,
//! `q`/ESC exits the loop).

use std::{
    io::BufRead,
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use stream_core::{net, sidecar::DEFAULT_WAKEUP_TARGET, StreamClient};

use crate::{cli::PresentArgs, config, source::FrameSource};

const FRAME_INTERVAL: Duration = Duration::from_millis(33);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

pub fn run(args: PresentArgs) -> Result<()> {
    let config = config::load(&args.config);
    let target = args
        .target
        .or_else(|| std::env::var("GRPC_TARGET").ok())
        .unwrap_or_else(|| "127.0.0.1:50051".to_string());
    let wakeup_target =
        std::env::var("WAKEUP_TARGET").unwrap_or_else(|_| DEFAULT_WAKEUP_TARGET.to_string());

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let resolved = runtime.block_on(net::resolve_target(&target, 50051));

    let terminate = CancellationToken::new();
    let handler_terminate = terminate.clone();
    if let Err(err) = ctrlc::set_handler(move || handler_terminate.cancel()) {
        warn!(%err, "failed to install signal handler");
    }

    let client = StreamClient::new(
        runtime.handle().clone(),
        resolved.clone(),
        wakeup_target,
        Some(config.device_id.clone()),
        terminate.clone(),
    );
    if let Err(err) = client.start() {
        // Non-streaming run; the loop still drives the source and keys.
        error!(%err, "channel failed to become READY");
    } else {
        info!(target = %resolved, "streaming started");
    }

    let video = args
        .video
        .or_else(|| std::env::var("VIDEO_PATH").ok().map(PathBuf::from));
    let mut frames = FrameSource::open(video)?;
    let keys = spawn_stdin_reader();
    let mut last_heartbeat = Instant::now();

    'main: loop {
        if terminate.is_cancelled() {
            break;
        }

        loop {
            match keys.try_recv() {
                Ok(key) => match key.as_str() {
                    "w" | "W" => {
                        // START_STREAMING also provisions the remote node.
                        client.send_command("start_streaming");
                        client.send_command("wakeup");
                    }
                    "q" | "\u{1b}" => break 'main,
                    other => {
                        client.send_command(other);
                    }
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break 'main,
            }
        }

        if client.is_running() {
            let frame = frames.next_frame();
            client.send_frame(&frame);
            if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
                client.send_heartbeat();
                last_heartbeat = Instant::now();
            }
        }

        for record in client.pop_detections() {
            debug!(
                boxes = record.boxes.len(),
                timestamp_ms = record.timestamp_ms,
                "detections ready for overlay"
            );
        }
        if let Some(remote) = client.pop_remote_frame() {
            debug!(
                width = remote.image.width(),
                height = remote.image.height(),
                "remote frame ready for display"
            );
        }

        thread::sleep(FRAME_INTERVAL);
    }

    info!(
        sent = client.sent_frames(),
        received = client.received_results(),
        "presenter loop finished"
    );
    client.stop();
    Ok(())
}

/// Line-buffered stdin reader feeding runtime keys into the main loop.
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::bounded::<String>(8);
    thread::Builder::new()
        .name("stdin-keys".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let trimmed = line.trim().to_string();
                if trimmed.is_empty() {
                    continue;
                }
                if tx.send(trimmed).is_err() {
                    break;
                }
            }
        })
        .expect("failed to spawn stdin reader");
    rx
}
