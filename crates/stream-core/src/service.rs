//! Compute-side bi-directional stream handler.
//!
//! One handler instance serves one peer. All replies funnel through a single
//! bounded channel that backs the outbound stream, so the device-status
//! sender and the command loop can never interleave within a message. Frame
//! work runs on the blocking pool; a failed write or peer close tears the
//! stream down locally and the peer reconnects at its own cadence.

use std::{
    ops::ControlFlow,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use image::codecs::jpeg::JpegEncoder;
use tokio::{sync::mpsc, task};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{transport::Endpoint, Request, Response, Status, Streaming};
use tracing::{debug, error, info, warn};

use accel_core::{
    classes::ClassLabels, detect::Detector, enhance::Enhancer, DetectionThreshold, SessionManager,
};
use vision_proto::{
    compute::{compute_service_client::ComputeServiceClient, compute_service_server::ComputeService},
    data_types::{
        command, control_action, device_status::DeviceState, server_message, CameraFrame, Command,
        ConfigResponse, DetectionResult, DeviceStatus, ServerMessage,
    },
    DETECTION_RESULT_VERSION, TERMINATE_ACK,
};

use crate::{error::StreamError, sidecar};

const OUTBOUND_QUEUE: usize = 32;
const STATUS_INTERVAL: Duration = Duration::from_secs(1);
const REPLY_JPEG_QUALITY: u8 = 85;
const FORWARD_CONNECT_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Clone)]
/// Static wiring for the compute service.
pub struct ServiceConfig {
    pub device_id: String,
    /// Graph served when the node runs in lowlight-only mode.
    pub lowlight_graph: PathBuf,
    /// Wake-up RPC target fired on START_STREAMING.
    pub wakeup_target: Option<String>,
    /// Upstream peer to which inbound commands are replayed.
    pub forward_target: Option<String>,
}

pub struct ComputeStreamService {
    sessions: Arc<SessionManager>,
    threshold: Arc<DetectionThreshold>,
    config: ServiceConfig,
    shutdown: CancellationToken,
    latency_ms: Arc<AtomicU32>,
    frames_total: Arc<AtomicU64>,
}

impl ComputeStreamService {
    pub fn new(
        sessions: Arc<SessionManager>,
        threshold: Arc<DetectionThreshold>,
        config: ServiceConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            sessions,
            threshold,
            config,
            shutdown,
            latency_ms: Arc::new(AtomicU32::new(0)),
            frames_total: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[derive(Clone)]
struct HandlerContext {
    sessions: Arc<SessionManager>,
    threshold: Arc<DetectionThreshold>,
    config: ServiceConfig,
    shutdown: CancellationToken,
    running: Arc<AtomicBool>,
    latency_ms: Arc<AtomicU32>,
    frames_total: Arc<AtomicU64>,
}

#[tonic::async_trait]
impl ComputeService for ComputeStreamService {
    type DatastreamStream = ReceiverStream<Result<ServerMessage, Status>>;

    async fn datastream(
        &self,
        request: Request<Streaming<Command>>,
    ) -> Result<Response<Self::DatastreamStream>, Status> {
        let peer = request.remote_addr();
        info!(?peer, "datastream handler entered");
        let inbound = request.into_inner();

        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let running = Arc::new(AtomicBool::new(true));

        let context = HandlerContext {
            sessions: self.sessions.clone(),
            threshold: self.threshold.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            running: running.clone(),
            latency_ms: self.latency_ms.clone(),
            frames_total: self.frames_total.clone(),
        };

        tokio::spawn(status_sender(
            tx.clone(),
            running,
            self.shutdown.clone(),
            self.config.device_id.clone(),
            self.latency_ms.clone(),
            self.frames_total.clone(),
        ));
        tokio::spawn(read_loop(inbound, tx, context));

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

/// Emit a device-status message every second until the stream dies.
async fn status_sender(
    tx: mpsc::Sender<Result<ServerMessage, Status>>,
    running: Arc<AtomicBool>,
    shutdown: CancellationToken,
    device_id: String,
    latency_ms: Arc<AtomicU32>,
    frames_total: Arc<AtomicU64>,
) {
    let mut interval = tokio::time::interval(STATUS_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_frames = frames_total.load(Ordering::Relaxed);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        if !running.load(Ordering::Relaxed) {
            break;
        }
        let frames = frames_total.load(Ordering::Relaxed);
        let fps = frames.saturating_sub(last_frames) as f32;
        last_frames = frames;

        let status = DeviceStatus {
            device_id: device_id.clone(),
            state: DeviceState::GrpcReady as i32,
            frame_rate_fps: fps,
            cpu_temperature_c: read_cpu_temperature(),
            processing_latency_ms: latency_ms.load(Ordering::Relaxed),
        };
        let message = ServerMessage {
            payload: Some(server_message::Payload::DeviceStatus(status)),
        };
        if tx.send(Ok(message)).await.is_err() {
            debug!("status write failed (client closed); stopping sender");
            break;
        }
    }
    debug!("status sender exiting");
}

async fn read_loop(
    mut inbound: Streaming<Command>,
    tx: mpsc::Sender<Result<ServerMessage, Status>>,
    context: HandlerContext,
) {
    let forward = match &context.config.forward_target {
        Some(target) => match ForwardSession::open(target).await {
            Ok(session) => Some(session),
            Err(err) => {
                warn!(%target, %err, "forward session unavailable");
                None
            }
        },
        None => None,
    };

    while context.running.load(Ordering::Relaxed) {
        let message = tokio::select! {
            _ = context.shutdown.cancelled() => break,
            message = inbound.message() => message,
        };
        match message {
            Ok(Some(command)) => {
                if let Some(session) = &forward {
                    session.replay(&command);
                }
                if handle_command(&context, command, &tx).await.is_break() {
                    break;
                }
            }
            Ok(None) => {
                debug!("peer closed the stream");
                break;
            }
            Err(status) => {
                // Recovered locally; the peer reconnects at its own cadence.
                debug!(%status, "stream read ended");
                break;
            }
        }
    }

    context.running.store(false, Ordering::SeqCst);
    if let Some(session) = forward {
        session.stop();
    }
    debug!("datastream handler exiting");
}

async fn handle_command(
    context: &HandlerContext,
    command: Command,
    tx: &mpsc::Sender<Result<ServerMessage, Status>>,
) -> ControlFlow<()> {
    match command.payload {
        Some(command::Payload::ControlAction(control)) => match control.action() {
            control_action::Action::StopStreaming | control_action::Action::Reboot => {
                info!(action = ?control.action(), "control action; acking and shutting down");
                let ack = ServerMessage {
                    payload: Some(server_message::Payload::ConfigResponse(ConfigResponse {
                        success: true,
                        message: TERMINATE_ACK.into(),
                    })),
                };
                let _ = tx.send(Ok(ack)).await;
                context.running.store(false, Ordering::SeqCst);
                context.shutdown.cancel();
                ControlFlow::Break(())
            }
            control_action::Action::StartStreaming => {
                if let Some(target) = context.config.wakeup_target.clone() {
                    tokio::spawn(async move {
                        if let Err(err) = sidecar::send_wakeup(&target, "wakeup", "").await {
                            warn!(%target, %err, "wake-up trigger failed");
                        }
                    });
                }
                ControlFlow::Continue(())
            }
        },
        Some(command::Payload::Heartbeat(heartbeat)) => {
            debug!(timestamp = ?heartbeat.timestamp, "heartbeat");
            ControlFlow::Continue(())
        }
        Some(command::Payload::CameraFrame(frame)) => handle_camera_frame(context, frame, tx).await,
        Some(command::Payload::DetectionResult(result)) => {
            debug!(len = result.json.len(), "client-injected detection JSON");
            ControlFlow::Continue(())
        }
        Some(command::Payload::ConfigRequest(request)) => {
            if let Some(threshold) = request.threshold {
                context.threshold.set(threshold);
                info!(threshold, "detection threshold updated");
            }
            let response = ServerMessage {
                payload: Some(server_message::Payload::ConfigResponse(ConfigResponse {
                    success: true,
                    message: "config_saved".into(),
                })),
            };
            match tx.send(Ok(response)).await {
                Ok(()) => ControlFlow::Continue(()),
                Err(_) => {
                    debug!("write failed while responding to config request");
                    ControlFlow::Break(())
                }
            }
        }
        None => ControlFlow::Continue(()),
    }
}

async fn handle_camera_frame(
    context: &HandlerContext,
    frame: CameraFrame,
    tx: &mpsc::Sender<Result<ServerMessage, Status>>,
) -> ControlFlow<()> {
    let decoded = match image::load_from_memory(&frame.image_data) {
        Ok(image) => image.to_rgb8(),
        Err(err) => {
            // One bad frame never kills the stream.
            warn!(%err, "frame decode failed; dropping");
            metrics::counter!("vision_decode_errors_total").increment(1);
            return ControlFlow::Continue(());
        }
    };
    let camera_id = frame.camera_id.clone();
    let frame_timestamp_ms = frame
        .timestamp
        .as_ref()
        .map(|ts| ts.seconds * 1000 + i64::from(ts.nanos) / 1_000_000);
    let started = Instant::now();

    let reply = if context.sessions.is_lowlight_only() {
        let session = match context.sessions.get_or_create(&context.config.lowlight_graph) {
            Ok(session) => session,
            Err(err) => {
                error!(%err, "lowlight session unavailable; dropping frame");
                return ControlFlow::Continue(());
            }
        };
        let enhanced = task::spawn_blocking(move || Enhancer::new(session).enhance(&decoded)).await;
        match enhanced {
            Ok(Ok(enhanced)) => {
                let mut jpeg = Vec::new();
                if let Err(err) =
                    JpegEncoder::new_with_quality(&mut jpeg, REPLY_JPEG_QUALITY).encode_image(&enhanced)
                {
                    error!(%err, "enhanced frame encode failed; dropping");
                    return ControlFlow::Continue(());
                }
                ServerMessage {
                    payload: Some(server_message::Payload::CameraFrame(CameraFrame {
                        width: enhanced.width() as i32,
                        height: enhanced.height() as i32,
                        image_data: jpeg,
                        format: "JPEG".into(),
                        camera_id,
                        timestamp: frame.timestamp,
                    })),
                }
            }
            Ok(Err(err)) => {
                warn!(%err, "enhancement failed; dropping frame");
                return ControlFlow::Continue(());
            }
            Err(err) => {
                error!(%err, "enhancement worker panicked; dropping frame");
                return ControlFlow::Continue(());
            }
        }
    } else {
        let session = match context.sessions.default_session() {
            Ok(session) => session,
            Err(err) => {
                error!(%err, "detection session unavailable; dropping frame");
                return ControlFlow::Continue(());
            }
        };
        let threshold = context.threshold.clone();
        let output = task::spawn_blocking(move || {
            Detector::new(session, threshold, ClassLabels::default()).infer(&decoded, false)
        })
        .await;
        match output {
            Ok(Ok(output)) => ServerMessage {
                payload: Some(server_message::Payload::DetectionResult(DetectionResult {
                    version: DETECTION_RESULT_VERSION,
                    json: output.json,
                    camera_id,
                    frame_timestamp_ms,
                })),
            },
            Ok(Err(err)) => {
                // Logged and dropped; no failure message goes to the peer.
                warn!(%err, "inference failed; dropping frame");
                return ControlFlow::Continue(());
            }
            Err(err) => {
                error!(%err, "inference worker panicked; dropping frame");
                return ControlFlow::Continue(());
            }
        }
    };

    let elapsed_ms = started.elapsed().as_millis().min(u128::from(u32::MAX)) as u32;
    context.latency_ms.store(elapsed_ms, Ordering::Relaxed);
    context.frames_total.fetch_add(1, Ordering::Relaxed);
    metrics::histogram!("vision_frame_seconds").record(started.elapsed().as_secs_f64());

    match tx.send(Ok(reply)).await {
        Ok(()) => ControlFlow::Continue(()),
        Err(_) => {
            debug!("reply write failed (client closed)");
            context.running.store(false, Ordering::SeqCst);
            ControlFlow::Break(())
        }
    }
}

/// Upstream stream held for the lifetime of one handler, fed a copy of every
/// inbound command.
struct ForwardSession {
    tx: mpsc::Sender<Command>,
    drain: tokio::task::JoinHandle<()>,
}

impl ForwardSession {
    async fn open(target: &str) -> Result<Self, StreamError> {
        let endpoint = Endpoint::from_shared(format!("http://{target}"))?
            .connect_timeout(FORWARD_CONNECT_DEADLINE);
        let channel = endpoint.connect().await?;
        let mut grpc = ComputeServiceClient::new(channel);
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let mut inbound = grpc
            .datastream(Request::new(ReceiverStream::new(rx)))
            .await?
            .into_inner();
        let drain = tokio::spawn(async move {
            while let Ok(Some(_)) = inbound.message().await {}
        });
        info!(%target, "forward session opened");
        Ok(Self { tx, drain })
    }

    fn replay(&self, command: &Command) {
        if self.tx.try_send(command.clone()).is_err() {
            debug!("forward backlog full; dropping replayed command");
        }
    }

    fn stop(self) {
        drop(self.tx);
        self.drain.abort();
    }
}

/// Best-effort CPU temperature probe; zero when the platform does not
/// expose a thermal zone.
fn read_cpu_temperature() -> f32 {
    std::fs::read_to_string("/sys/class/thermal/thermal_zone0/temp")
        .ok()
        .and_then(|raw| raw.trim().parse::<f32>().ok())
        .map(|millidegrees| millidegrees / 1000.0)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_temperature_probe_never_panics() {
        let celsius = read_cpu_temperature();
        assert!(celsius.is_finite());
    }
}
