//! One-shot RPCs independent of the main stream: the unary JSON submission
//! endpoint served by this node and the wake-up trigger sent to a remote
//! provisioning host.

use std::time::Duration;

use tonic::{transport::Endpoint, Request, Response, Status};
use tracing::{debug, info, warn};

use vision_proto::{
    app_comm::{
        app_comm_service_client::AppCommServiceClient,
        app_comm_service_server::AppCommService,
        JsonRequest, JsonResponse,
    },
    wakeup::{wake_up_service_client::WakeUpServiceClient, WakeUpRequest, WakeUpResponse},
};

use crate::{error::StreamError, net};

const FORWARD_DEADLINE: Duration = Duration::from_secs(3);
const WAKEUP_DEADLINE: Duration = Duration::from_secs(5);

/// Default wake-up target when `WAKEUP_TARGET` is unset.
pub const DEFAULT_WAKEUP_TARGET: &str = "192.168.100.59:50050";

/// Unary endpoint accepting JSON from external applications.
pub struct AppCommEndpoint {
    forward_target: Option<String>,
}

impl AppCommEndpoint {
    pub fn new(forward_target: Option<String>) -> Self {
        Self { forward_target }
    }
}

#[tonic::async_trait]
impl AppCommService for AppCommEndpoint {
    async fn send_json(
        &self,
        request: Request<JsonRequest>,
    ) -> Result<Response<JsonResponse>, Status> {
        let payload = request.into_inner().json_payload;
        let preview: String = payload.chars().take(120).collect();
        debug!(len = payload.len(), %preview, "received JSON submission");

        if let Some(target) = &self.forward_target {
            if let Err(err) = forward_json(target, payload).await {
                warn!(%target, %err, "JSON forward failed");
            }
        }

        Ok(Response::new(JsonResponse {
            success: true,
            message: "received".into(),
        }))
    }
}

async fn forward_json(target: &str, payload: String) -> Result<(), StreamError> {
    let endpoint = Endpoint::from_shared(format!("http://{target}"))?
        .connect_timeout(FORWARD_DEADLINE)
        .timeout(FORWARD_DEADLINE);
    let channel = endpoint.connect().await?;
    let mut client = AppCommServiceClient::new(channel);
    let response = client
        .send_json(JsonRequest {
            json_payload: payload,
        })
        .await?
        .into_inner();
    debug!(%target, message = %response.message, "JSON forwarded");
    Ok(())
}

/// Fire the wake-up RPC at `target`, resolving `.local` names first.
pub async fn send_wakeup(
    target: &str,
    script_name: &str,
    args: &str,
) -> Result<WakeUpResponse, StreamError> {
    let resolved = net::resolve_target(target, 50050).await;
    let endpoint = Endpoint::from_shared(format!("http://{resolved}"))?
        .connect_timeout(WAKEUP_DEADLINE)
        .timeout(WAKEUP_DEADLINE);
    let channel = endpoint.connect().await?;
    let mut client = WakeUpServiceClient::new(channel);
    let response = client
        .trigger_script(WakeUpRequest {
            script_name: script_name.into(),
            args: args.into(),
        })
        .await?
        .into_inner();
    info!(
        target = %resolved,
        success = response.success,
        pid = response.process_id,
        message = %response.message,
        "wake-up RPC completed"
    );
    Ok(response)
}
