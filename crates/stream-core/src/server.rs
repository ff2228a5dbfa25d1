//! Listener lifecycle for the compute role.
//!
//! The gRPC server runs on a dedicated thread owning its own runtime so the
//! caller keeps a plain synchronous handle. Shutdown is guarded to run once:
//! it fires the cancellation token, waits a bounded time for the runtime
//! thread to drain, and detaches rather than risking a join deadlock when
//! the drain overruns.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc as std_mpsc, Arc,
    },
    thread,
    time::{Duration, Instant},
};

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{debug, error, info, warn};

use vision_proto::{
    app_comm::app_comm_service_server::AppCommServiceServer,
    compute::compute_service_server::ComputeServiceServer,
};

use crate::{error::StreamError, service::ComputeStreamService, sidecar::AppCommEndpoint};

const DRAIN_DEADLINE: Duration = Duration::from_secs(3);
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Handle to the server thread. Dropping it performs a guarded shutdown.
pub struct ServerHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    shutting_down: Arc<AtomicBool>,
    exited: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

/// Bind `addr`, register both services, and serve until `cancel` fires.
/// Returns once the listener is bound and ready.
pub fn spawn_server(
    addr: SocketAddr,
    compute: ComputeStreamService,
    app_comm: AppCommEndpoint,
    cancel: CancellationToken,
) -> Result<ServerHandle, StreamError> {
    let exited = Arc::new(AtomicBool::new(false));
    let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<SocketAddr, StreamError>>(1);

    let thread_cancel = cancel.clone();
    let thread_exited = exited.clone();
    let thread = thread::Builder::new()
        .name("grpc-server".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    let _ = ready_tx.send(Err(StreamError::Bind {
                        addr: addr.to_string(),
                        source: err,
                    }));
                    thread_exited.store(true, Ordering::SeqCst);
                    return;
                }
            };

            runtime.block_on(async move {
                let listener = match TcpListener::bind(addr).await {
                    Ok(listener) => listener,
                    Err(err) => {
                        let _ = ready_tx.send(Err(StreamError::Bind {
                            addr: addr.to_string(),
                            source: err,
                        }));
                        return;
                    }
                };
                let local_addr = match listener.local_addr() {
                    Ok(local_addr) => local_addr,
                    Err(err) => {
                        let _ = ready_tx.send(Err(StreamError::Bind {
                            addr: addr.to_string(),
                            source: err,
                        }));
                        return;
                    }
                };
                info!(%local_addr, "server listening");
                let _ = ready_tx.send(Ok(local_addr));

                let shutdown = thread_cancel.clone();
                let result = Server::builder()
                    .add_service(ComputeServiceServer::new(compute))
                    .add_service(AppCommServiceServer::new(app_comm))
                    .serve_with_incoming_shutdown(
                        TcpListenerStream::new(listener),
                        shutdown.cancelled(),
                    )
                    .await;
                if let Err(err) = result {
                    error!(%err, "server terminated abnormally");
                }
            });
            thread_exited.store(true, Ordering::SeqCst);
            debug!("server thread exiting");
        })
        .map_err(|err| StreamError::Bind {
            addr: addr.to_string(),
            source: err,
        })?;

    let local_addr = ready_rx.recv().map_err(|_| StreamError::Bind {
        addr: addr.to_string(),
        source: std::io::Error::other("server thread died before readiness"),
    })??;

    Ok(ServerHandle {
        local_addr,
        cancel,
        shutting_down: Arc::new(AtomicBool::new(false)),
        exited,
        thread: Some(thread),
    })
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, drain in-flight streams, and join the server thread.
    /// Runs exactly once; later calls report `ShutdownInProgress`.
    pub fn shutdown(&mut self) -> Result<(), StreamError> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("shutdown already in progress");
            return Err(StreamError::ShutdownInProgress);
        }

        let start = Instant::now();
        self.cancel.cancel();

        while !self.exited.load(Ordering::SeqCst) {
            if start.elapsed() > DRAIN_DEADLINE {
                warn!(
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "server thread did not drain in time; detaching"
                );
                self.thread.take();
                return Ok(());
            }
            thread::sleep(DRAIN_POLL);
        }

        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("server thread panicked during shutdown");
            }
        }
        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "server shutdown complete"
        );
        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
