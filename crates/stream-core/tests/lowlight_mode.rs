//! Lowlight-only mode: the compute node replies with enhanced frames
//! instead of detection results.
//!
//! Kept in its own test binary because the mode switch is process-wide
//! (read from the environment).

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
    sidecar::AppCommEndpoint, spawn_server, ComputeStreamService, ServiceConfig, StreamClient,
};

#[test]
fn enhanced_reply_preserves_frame_dimensions() {
    std::env::set_var("LOWLIGHT_ENHANCE", "1");

    let shutdown = CancellationToken::new();
    let sessions = Arc::new(SessionManager::new());
    sessions
        .init(Path::new("zero_dce_pp.hef"), StubDevice::create)
        .unwrap();
    let service = ComputeStreamService::new(
        sessions,
        Arc::new(DetectionThreshold::new(0.5)),
        ServiceConfig {
            device_id: "device_001".into(),
            lowlight_graph: PathBuf::from("zero_dce_pp.hef"),
            wakeup_target: None,
            forward_target: None,
        },
        shutdown.clone(),
    );
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let mut server =
        spawn_server(addr, service, AppCommEndpoint::new(None), shutdown.clone()).unwrap();

    let runtime = tokio::runtime::Runtime::new().unwrap();
    let client = StreamClient::new(
        runtime.handle().clone(),
        server.local_addr().to_string(),
        "127.0.0.1:1",
        Some("front".into()),
        CancellationToken::new(),
    );
    client.start().unwrap();

    let frame = RgbImage::from_pixel(320, 240, Rgb([30, 30, 30]));
    assert!(client.send_frame(&frame));

    let deadline = Instant::now() + Duration::from_secs(5);
    let remote = loop {
        if let Some(remote) = client.pop_remote_frame() {
            break remote;
        }
        assert!(Instant::now() < deadline, "no enhanced frame arrived");
        thread::sleep(Duration::from_millis(20));
    };
    assert_eq!(remote.image.dimensions(), (320, 240));
    assert_eq!(remote.camera_id.as_deref(), Some("front"));
    // No detection results in lowlight-only mode.
    assert_eq!(client.received_results(), 0);

    client.stop();
    server.shutdown().unwrap();
}
