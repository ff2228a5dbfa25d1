//! In-process round trips over a loopback listener, with the software stub
//! driver standing in for the accelerator.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use image::{Rgb, RgbImage};
use tokio_util::sync::CancellationToken;

use accel_core::{stub::StubDevice, DetectionThreshold, SessionManager};
use stream_core::{
    sidecar::AppCommEndpoint, spawn_server, ComputeStreamService, ServerHandle, ServiceConfig,
    StreamClient, StreamError,
};
use vision_proto::app_comm::{app_comm_service_client::AppCommServiceClient, JsonRequest};

fn service_config() -> ServiceConfig {
    ServiceConfig {
        device_id: "device_001".into(),
        lowlight_graph: PathBuf::from("zero_dce_pp.hef"),
        wakeup_target: None,
        forward_target: None,
    }
}

fn start_compute(shutdown: &CancellationToken) -> ServerHandle {
    let sessions = Arc::new(SessionManager::new());
    sessions
        .init(Path::new("best.hef"), StubDevice::create)
        .unwrap();
    let service = ComputeStreamService::new(
        sessions,
        Arc::new(DetectionThreshold::new(0.5)),
        service_config(),
        shutdown.clone(),
    );
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    spawn_server(addr, service, AppCommEndpoint::new(None), shutdown.clone()).unwrap()
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    condition()
}

#[test]
fn detection_round_trip_yields_empty_result() {
    let shutdown = CancellationToken::new();
    let mut server = start_compute(&shutdown);
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let terminate = CancellationToken::new();
    let client = StreamClient::new(
        runtime.handle().clone(),
        server.local_addr().to_string(),
        "127.0.0.1:1",
        Some("front".into()),
        terminate.clone(),
    );
    client.start().unwrap();

    let frame = RgbImage::from_pixel(640, 640, Rgb([255, 0, 0]));
    assert!(client.send_frame(&frame));
    assert_eq!(client.sent_frames(), 1);

    assert!(
        wait_until(Duration::from_secs(5), || client.received_results() == 1),
        "no detection result arrived"
    );
    // A red square triggers no classes: the empty result is counted but
    // never queued for overlay.
    assert!(client.pop_detections().is_empty());

    client.stop();
    server.shutdown().unwrap();
}

#[test]
fn counters_stay_monotonic_across_frames() {
    let shutdown = CancellationToken::new();
    let mut server = start_compute(&shutdown);
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let client = StreamClient::new(
        runtime.handle().clone(),
        server.local_addr().to_string(),
        "127.0.0.1:1",
        None,
        CancellationToken::new(),
    );
    client.start().unwrap();

    let frame = RgbImage::from_pixel(64, 64, Rgb([10, 20, 30]));
    let mut last_sent = 0;
    for _ in 0..5 {
        assert!(client.send_frame(&frame));
        let sent = client.sent_frames();
        assert!(sent > last_sent);
        last_sent = sent;
    }
    assert!(
        wait_until(Duration::from_secs(5), || client.received_results() == 5),
        "expected one result per frame"
    );

    client.stop();
    server.shutdown().unwrap();
}

#[test]
fn stop_streaming_terminates_both_sides() {
    let shutdown = CancellationToken::new();
    let mut server = start_compute(&shutdown);
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let terminate = CancellationToken::new();
    let client = StreamClient::new(
        runtime.handle().clone(),
        server.local_addr().to_string(),
        "127.0.0.1:1",
        None,
        terminate.clone(),
    );
    client.start().unwrap();

    assert!(client.send_command("stop_streaming"));

    // The compute side acks with terminate_ack and requests local shutdown;
    // the presenter raises its terminate signal within a heartbeat interval.
    assert!(
        wait_until(Duration::from_secs(2), || terminate.is_cancelled()),
        "presenter terminate signal not raised"
    );
    assert!(
        wait_until(Duration::from_secs(2), || shutdown.is_cancelled()),
        "compute shutdown not requested"
    );

    client.stop();
    server.shutdown().unwrap();
}

#[test]
fn unreachable_peer_reports_channel_unready() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let client = StreamClient::new(
        runtime.handle().clone(),
        // Non-routable address: the dial hangs until the connect deadline.
        "10.255.255.1:50051",
        "127.0.0.1:1",
        None,
        CancellationToken::new(),
    );

    let started = Instant::now();
    let err = client.start().unwrap_err();
    assert!(matches!(err, StreamError::ChannelUnready { .. }), "{err}");
    assert!(started.elapsed() < Duration::from_secs(8));
    assert!(!client.is_running());

    // No stream was opened, so stop must be a clean no-op.
    client.stop();
}

#[test]
fn json_submission_side_channel_accepts_payloads() {
    let shutdown = CancellationToken::new();
    let mut server = start_compute(&shutdown);
    let addr = server.local_addr();
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let response = runtime.block_on(async move {
        let mut client = AppCommServiceClient::connect(format!("http://{addr}"))
            .await
            .unwrap();
        client
            .send_json(JsonRequest {
                json_payload: r#"{"nav":{"heading":120.5}}"#.into(),
            })
            .await
            .unwrap()
            .into_inner()
    });
    assert!(response.success);
    assert_eq!(response.message, "received");

    server.shutdown().unwrap();
}

#[test]
fn shutdown_guard_runs_once() {
    let shutdown = CancellationToken::new();
    let mut server = start_compute(&shutdown);
    server.shutdown().unwrap();
    assert!(matches!(
        server.shutdown().unwrap_err(),
        StreamError::ShutdownInProgress
    ));
}
