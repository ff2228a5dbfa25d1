//! Presenter-side stream client.
//!
//! Owns one channel to the compute peer. Writes go through a bounded
//! channel into the RPC's outbound stream, so concurrent callers can never
//! interleave within a message; a reader task drains server messages into
//! thread-safe detection and remote-frame queues that the display loop
//! polls between frames.

use std::{
    collections::VecDeque,
    ops::ControlFlow,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use chrono::Utc;
use image::{codecs::jpeg::JpegEncoder, RgbImage};
use tokio::{runtime::Handle, sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{transport::Endpoint, Request, Streaming};
use tracing::{debug, info, warn};

use vision_proto::{
    compute::compute_service_client::ComputeServiceClient,
    data_types::{
        command, control_action, server_message, CameraFrame, Command, ControlAction,
        DetectionResult, Heartbeat, ServerMessage,
    },
    timestamp_now, DETECTION_RESULT_VERSION, TERMINATE_ACK,
};

use crate::{error::StreamError, parse, sidecar};

const CONNECT_DEADLINE: Duration = Duration::from_secs(5);
const OUTBOUND_QUEUE: usize = 32;
const FRAME_JPEG_QUALITY: u8 = 85;

/// Remote-frame buffer depth; oldest entries are evicted on overflow.
const REMOTE_FRAME_CAPACITY: usize = 4;
/// Detection queue bound protecting against a stalled display loop.
const DETECTION_QUEUE_CAPACITY: usize = 64;

/// Detections observed on the wire for one frame.
pub struct DetectionRecord {
    pub boxes: Vec<parse::ParsedBox>,
    pub timestamp_ms: i64,
}

/// A decoded frame forwarded or enhanced by the compute peer.
pub struct RemoteFrame {
    pub image: RgbImage,
    pub camera_id: Option<String>,
    pub timestamp_ms: i64,
}

struct Shared {
    running: AtomicBool,
    sent_frames: AtomicU64,
    received_results: AtomicU64,
    detections: Mutex<Vec<DetectionRecord>>,
    remote_frames: Mutex<VecDeque<RemoteFrame>>,
    terminate: CancellationToken,
}

struct ActiveStream {
    tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

pub struct StreamClient {
    handle: Handle,
    target: String,
    wakeup_target: String,
    camera_id: Option<String>,
    shared: Arc<Shared>,
    active: Mutex<Option<ActiveStream>>,
}

impl StreamClient {
    /// `terminate` is the process-wide shutdown token; a `terminate_ack`
    /// from the peer cancels it.
    pub fn new(
        handle: Handle,
        target: impl Into<String>,
        wakeup_target: impl Into<String>,
        camera_id: Option<String>,
        terminate: CancellationToken,
    ) -> Self {
        Self {
            handle,
            target: target.into(),
            wakeup_target: wakeup_target.into(),
            camera_id,
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                sent_frames: AtomicU64::new(0),
                received_results: AtomicU64::new(0),
                detections: Mutex::new(Vec::new()),
                remote_frames: Mutex::new(VecDeque::with_capacity(REMOTE_FRAME_CAPACITY)),
                terminate,
            }),
            active: Mutex::new(None),
        }
    }

    /// Open the stream and start the reader. Idempotent while running.
    pub fn start(&self) -> Result<(), StreamError> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match self.handle.block_on(self.open_stream()) {
            Ok(active) => {
                *self.active.lock().expect("client mutex poisoned") = Some(active);
                info!(target = %self.target, "stream opened");
                Ok(())
            }
            Err(err) => {
                self.shared.running.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    async fn open_stream(&self) -> Result<ActiveStream, StreamError> {
        let unready = || StreamError::ChannelUnready {
            target: self.target.clone(),
            timeout_secs: CONNECT_DEADLINE.as_secs(),
        };
        let endpoint = Endpoint::from_shared(format!("http://{}", self.target))
            .map_err(|_| unready())?
            .connect_timeout(CONNECT_DEADLINE);
        let channel = match tokio::time::timeout(CONNECT_DEADLINE, endpoint.connect()).await {
            Ok(Ok(channel)) => channel,
            Ok(Err(err)) => {
                debug!(target = %self.target, %err, "channel connect failed");
                return Err(unready());
            }
            Err(_) => return Err(unready()),
        };

        let mut grpc = ComputeServiceClient::new(channel);
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let inbound = grpc
            .datastream(Request::new(ReceiverStream::new(rx)))
            .await?
            .into_inner();
        let cancel = CancellationToken::new();
        let reader = self
            .handle
            .spawn(reader_task(inbound, cancel.clone(), self.shared.clone()));
        Ok(ActiveStream { tx, cancel, reader })
    }

    /// Cancel the RPC to unblock any pending read, signal writes-done, and
    /// join the reader. Idempotent.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        let active = self.active.lock().expect("client mutex poisoned").take();
        if let Some(active) = active {
            active.cancel.cancel();
            drop(active.tx);
            if let Err(err) = self.handle.block_on(active.reader) {
                debug!(%err, "reader task join failed");
            }
        }
    }

    /// Translate a command token and write it to the stream. `"wakeup"` is a
    /// one-shot unary RPC and never touches the stream. Returns `false` when
    /// the client is not running or the write failed.
    pub fn send_command(&self, text: &str) -> bool {
        if text == "wakeup" {
            return self.trigger_wakeup();
        }
        if !self.shared.running.load(Ordering::SeqCst) {
            return false;
        }
        self.write(Command {
            sent_at: Some(timestamp_now()),
            payload: Some(command_payload(text, &self.camera_id)),
        })
    }

    /// JPEG-encode `image` and write it as a camera frame.
    pub fn send_frame(&self, image: &RgbImage) -> bool {
        if !self.shared.running.load(Ordering::SeqCst) {
            return false;
        }
        let mut jpeg = Vec::new();
        if let Err(err) = JpegEncoder::new_with_quality(&mut jpeg, FRAME_JPEG_QUALITY).encode_image(image)
        {
            warn!(%err, "frame JPEG encode failed");
            return false;
        }
        let frame = CameraFrame {
            image_data: jpeg,
            width: image.width() as i32,
            height: image.height() as i32,
            format: "JPEG".into(),
            camera_id: self.camera_id.clone(),
            timestamp: Some(timestamp_now()),
        };
        let ok = self.write(Command {
            sent_at: Some(timestamp_now()),
            payload: Some(command::Payload::CameraFrame(frame)),
        });
        if ok {
            self.shared.sent_frames.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("vision_sent_frames_total").increment(1);
        }
        ok
    }

    /// Periodic liveness signal towards the compute peer.
    pub fn send_heartbeat(&self) -> bool {
        if !self.shared.running.load(Ordering::SeqCst) {
            return false;
        }
        self.write(Command {
            sent_at: Some(timestamp_now()),
            payload: Some(command::Payload::Heartbeat(Heartbeat {
                timestamp: Some(timestamp_now()),
            })),
        })
    }

    fn write(&self, command: Command) -> bool {
        let tx = {
            let guard = self.active.lock().expect("client mutex poisoned");
            match guard.as_ref() {
                Some(active) => active.tx.clone(),
                None => return false,
            }
        };
        if tx.blocking_send(command).is_err() {
            warn!("stream write failed; peer closed");
            self.shared.running.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }

    fn trigger_wakeup(&self) -> bool {
        match self
            .handle
            .block_on(sidecar::send_wakeup(&self.wakeup_target, "wakeup", ""))
        {
            Ok(response) => response.success,
            Err(err) => {
                warn!(%err, "wake-up RPC failed");
                false
            }
        }
    }

    /// Swap out and return every accumulated detection record.
    pub fn pop_detections(&self) -> Vec<DetectionRecord> {
        std::mem::take(&mut *self.shared.detections.lock().expect("detection queue poisoned"))
    }

    /// Return one buffered remote frame, oldest first.
    pub fn pop_remote_frame(&self) -> Option<RemoteFrame> {
        self.shared
            .remote_frames
            .lock()
            .expect("remote frame queue poisoned")
            .pop_front()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn sent_frames(&self) -> u64 {
        self.shared.sent_frames.load(Ordering::Relaxed)
    }

    pub fn received_results(&self) -> u64 {
        self.shared.received_results.load(Ordering::Relaxed)
    }
}

fn command_payload(text: &str, camera_id: &Option<String>) -> command::Payload {
    let action = match text {
        "start_streaming" => Some(control_action::Action::StartStreaming),
        "stop_streaming" => Some(control_action::Action::StopStreaming),
        "reboot" | "32" => Some(control_action::Action::Reboot),
        _ => None,
    };
    match action {
        Some(action) => command::Payload::ControlAction(ControlAction {
            action: action as i32,
        }),
        None => command::Payload::DetectionResult(DetectionResult {
            version: DETECTION_RESULT_VERSION,
            json: text.to_string(),
            camera_id: camera_id.clone(),
            frame_timestamp_ms: None,
        }),
    }
}

async fn reader_task(
    mut inbound: Streaming<ServerMessage>,
    cancel: CancellationToken,
    shared: Arc<Shared>,
) {
    debug!("reader task started");
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = inbound.message() => message,
        };
        match message {
            Ok(Some(server_message)) => {
                if handle_server_message(server_message, &shared).is_break() {
                    break;
                }
            }
            Ok(None) => {
                debug!("server closed the stream");
                break;
            }
            Err(status) => {
                debug!(%status, "stream read ended");
                break;
            }
        }
    }
    shared.running.store(false, Ordering::SeqCst);
    debug!("reader task exiting");
}

fn handle_server_message(message: ServerMessage, shared: &Shared) -> ControlFlow<()> {
    match message.payload {
        Some(server_message::Payload::DetectionResult(result)) => {
            shared.received_results.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("vision_received_results_total").increment(1);
            let timestamp_ms = result
                .frame_timestamp_ms
                .unwrap_or_else(|| Utc::now().timestamp_millis());
            match parse::parse_detections(&result.json) {
                Ok(boxes) if !boxes.is_empty() => {
                    push_detection(shared, DetectionRecord { boxes, timestamp_ms });
                }
                Ok(_) => {}
                Err(err) => debug!(%err, "undecodable detection payload"),
            }
            ControlFlow::Continue(())
        }
        Some(server_message::Payload::CameraFrame(frame)) => {
            match image::load_from_memory(&frame.image_data) {
                Ok(decoded) => push_remote_frame(
                    shared,
                    RemoteFrame {
                        image: decoded.to_rgb8(),
                        camera_id: frame.camera_id,
                        timestamp_ms: frame
                            .timestamp
                            .map(|ts| ts.seconds * 1000 + i64::from(ts.nanos) / 1_000_000)
                            .unwrap_or_default(),
                    },
                ),
                Err(err) => warn!(%err, "remote frame decode failed"),
            }
            ControlFlow::Continue(())
        }
        Some(server_message::Payload::DeviceStatus(status)) => {
            debug!(
                device = %status.device_id,
                state = status.state,
                fps = status.frame_rate_fps,
                latency_ms = status.processing_latency_ms,
                "device status"
            );
            ControlFlow::Continue(())
        }
        Some(server_message::Payload::ConfigResponse(response)) => {
            if response.message == TERMINATE_ACK {
                info!("terminate_ack received; beginning local shutdown");
                shared.terminate.cancel();
                ControlFlow::Break(())
            } else {
                debug!(
                    success = response.success,
                    message = %response.message,
                    "config response"
                );
                ControlFlow::Continue(())
            }
        }
        None => ControlFlow::Continue(()),
    }
}

fn push_detection(shared: &Shared, record: DetectionRecord) {
    let mut queue = shared.detections.lock().expect("detection queue poisoned");
    if queue.len() >= DETECTION_QUEUE_CAPACITY {
        queue.remove(0);
    }
    queue.push(record);
}

fn push_remote_frame(shared: &Shared, frame: RemoteFrame) {
    let mut queue = shared
        .remote_frames
        .lock()
        .expect("remote frame queue poisoned");
    if queue.len() >= REMOTE_FRAME_CAPACITY {
        queue.pop_front();
    }
    queue.push_back(frame);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_shared() -> Shared {
        Shared {
            running: AtomicBool::new(true),
            sent_frames: AtomicU64::new(0),
            received_results: AtomicU64::new(0),
            detections: Mutex::new(Vec::new()),
            remote_frames: Mutex::new(VecDeque::new()),
            terminate: CancellationToken::new(),
        }
    }

    fn record(timestamp_ms: i64) -> DetectionRecord {
        DetectionRecord {
            boxes: vec![parse::ParsedBox {
                x: 0.1,
                y: 0.1,
                w: 0.2,
                h: 0.2,
                score: Some(0.9),
                label: None,
            }],
            timestamp_ms,
        }
    }

    #[test]
    fn control_tokens_map_to_actions() {
        let payload = command_payload("stop_streaming", &None);
        match payload {
            command::Payload::ControlAction(action) => {
                assert_eq!(action.action, control_action::Action::StopStreaming as i32);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
        // "32" is the legacy alias for reboot.
        match command_payload("32", &None) {
            command::Payload::ControlAction(action) => {
                assert_eq!(action.action, control_action::Action::Reboot as i32);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn free_text_becomes_detection_result() {
        let payload = command_payload(r#"{"detections":[]}"#, &Some("front".into()));
        match payload {
            command::Payload::DetectionResult(result) => {
                assert_eq!(result.json, r#"{"detections":[]}"#);
                assert_eq!(result.camera_id.as_deref(), Some("front"));
                assert_eq!(result.version, DETECTION_RESULT_VERSION);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn remote_frame_queue_is_bounded_at_four() {
        let shared = empty_shared();
        for index in 0..10i64 {
            push_remote_frame(
                &shared,
                RemoteFrame {
                    image: RgbImage::new(2, 2),
                    camera_id: None,
                    timestamp_ms: index,
                },
            );
            assert!(shared.remote_frames.lock().unwrap().len() <= REMOTE_FRAME_CAPACITY);
        }
        // Oldest evicted: the survivors are the last four pushes.
        let queue = shared.remote_frames.lock().unwrap();
        let stamps: Vec<i64> = queue.iter().map(|f| f.timestamp_ms).collect();
        assert_eq!(stamps, vec![6, 7, 8, 9]);
    }

    #[test]
    fn detection_queue_drops_oldest_past_capacity() {
        let shared = empty_shared();
        for index in 0..(DETECTION_QUEUE_CAPACITY as i64 + 5) {
            push_detection(&shared, record(index));
        }
        let queue = shared.detections.lock().unwrap();
        assert_eq!(queue.len(), DETECTION_QUEUE_CAPACITY);
        assert_eq!(queue.first().unwrap().timestamp_ms, 5);
    }

    #[test]
    fn terminate_ack_cancels_the_shared_token() {
        let shared = empty_shared();
        let flow = handle_server_message(
            ServerMessage {
                payload: Some(server_message::Payload::ConfigResponse(
                    vision_proto::data_types::ConfigResponse {
                        success: true,
                        message: TERMINATE_ACK.into(),
                    },
                )),
            },
            &shared,
        );
        assert!(flow.is_break());
        assert!(shared.terminate.is_cancelled());
    }

    #[test]
    fn ordinary_config_response_is_ignored() {
        let shared = empty_shared();
        let flow = handle_server_message(
            ServerMessage {
                payload: Some(server_message::Payload::ConfigResponse(
                    vision_proto::data_types::ConfigResponse {
                        success: true,
                        message: "config_saved".into(),
                    },
                )),
            },
            &shared,
        );
        assert!(flow.is_continue());
        assert!(!shared.terminate.is_cancelled());
    }

    #[test]
    fn detection_result_increments_counter_even_when_empty() {
        let shared = empty_shared();
        let flow = handle_server_message(
            ServerMessage {
                payload: Some(server_message::Payload::DetectionResult(DetectionResult {
                    version: DETECTION_RESULT_VERSION,
                    json: r#"{"detections":[],"count":0}"#.into(),
                    camera_id: None,
                    frame_timestamp_ms: Some(123),
                })),
            },
            &shared,
        );
        assert!(flow.is_continue());
        assert_eq!(shared.received_results.load(Ordering::Relaxed), 1);
        assert!(shared.detections.lock().unwrap().is_empty());
    }
}
