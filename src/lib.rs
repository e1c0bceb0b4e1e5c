use std::{convert::Infallible, net::SocketAddr, time::Duration};

pub mod assets;
pub mod config;
pub mod error;
pub mod handler;
pub mod init_log;
pub mod layers;
pub mod metrics;
pub mod util;

pub type DynError = Box<dyn std::error::Error + Send + Sync>;

use axum::{Router, extract::Request};
use hyper::body::Incoming;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::{conn::auto::Builder, graceful::GracefulShutdown},
};
use log::{info, warn};
use tokio::{net::TcpListener, sync::mpsc};
use tower::{Service, ServiceExt};

use crate::util::io::{TimeoutIO, create_dual_stack_listener};

const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP/1.1 + HTTP/2 server driving an axum [`Router`].
///
/// Stops accepting when the paired shutdown sender fires (or is dropped), then
/// gives open connections [`GRACEFUL_SHUTDOWN_TIMEOUT`] to finish.
pub struct Server {
    pub port: u16,
    pub idle_timeout: Duration,
    router: Router,
    shutdown_rx: mpsc::Receiver<()>,
}

pub fn new_server(port: u16, router: Router) -> (Server, mpsc::Sender<()>) {
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let server = Server {
        port,
        idle_timeout: Duration::from_secs(120),
        router,
        shutdown_rx,
    };
    (server, shutdown_tx)
}

impl Server {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Listen on `[::]:port` (IPv4 and IPv6) until shutdown.
    pub async fn run(self) -> Result<(), std::io::Error> {
        let listener = create_dual_stack_listener(self.port)?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown.
    pub async fn serve(mut self, listener: TcpListener) -> Result<(), std::io::Error> {
        info!("listening on {}", listener.local_addr()?);
        let builder = Builder::new(TokioExecutor::new());
        let graceful = GracefulShutdown::new();
        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("start graceful shutdown!");
                    drop(listener);
                    break;
                }
                conn = listener.accept() => {
                    match conn {
                        Ok((conn, client_socket_addr)) => {
                            handle_connection(conn, client_socket_addr, self.router.clone(), builder.clone(), &graceful, self.idle_timeout).await;
                        }
                        Err(e) => {
                            warn!("accept error:{e}");
                        }
                    }
                }
            }
        }
        tokio::select! {
            _ = graceful.shutdown() => {
                info!("Gracefully shutdown!");
            },
            _ = tokio::time::sleep(GRACEFUL_SHUTDOWN_TIMEOUT) => {
                info!("Waited {GRACEFUL_SHUTDOWN_TIMEOUT:?} for graceful shutdown, aborting...");
            }
        }
        Ok(())
    }
}

async fn handle_connection(
    conn: tokio::net::TcpStream, client_socket_addr: SocketAddr, app: Router, builder: Builder<TokioExecutor>,
    graceful: &GracefulShutdown, timeout: Duration,
) {
    let stream = TokioIo::new(Box::pin(TimeoutIO::new(conn, timeout)));
    // exposes ConnectInfo<SocketAddr> to handlers and the trace span
    let mut make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    let app = unwrap_infallible(make_service.call(client_socket_addr).await);
    let hyper_service = hyper::service::service_fn(move |request: Request<Incoming>| app.clone().oneshot(request));

    let conn = builder.serve_connection_with_upgrades(stream, hyper_service);
    let conn = graceful.watch(conn.into_owned());

    tokio::spawn(async move {
        if let Err(err) = conn.await {
            handle_hyper_error(client_socket_addr, err);
        }
        log::debug!("connection dropped: {client_socket_addr}");
    });
}

fn handle_hyper_error(client_socket_addr: SocketAddr, http_err: DynError) {
    use std::error::Error;
    let peer = client_socket_addr.ip().to_canonical();
    match http_err.downcast_ref::<hyper::Error>() {
        Some(hyper_err) => {
            let level = if hyper_err.is_user() { log::Level::Warn } else { log::Level::Debug };
            let source = hyper_err.source().unwrap_or(hyper_err);
            log::log!(
                level,
                "[hyper {}]: {:?} from {peer}",
                if hyper_err.is_user() { "user" } else { "system" },
                source
            );
        }
        None => match http_err.downcast_ref::<std::io::Error>() {
            Some(io_err) => warn!("[hyper io]: [{}] {} from {peer}", io_err.kind(), io_err),
            None => warn!("[hyper]: {http_err} from {peer}"),
        },
    }
}

/// Resolve on SIGTERM or Ctrl-C.
#[cfg(unix)]
pub async fn wait_signal() -> Result<(), DynError> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut terminate_signal = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = terminate_signal.recv() => {
            info!("receive terminate signal");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("receive ctrl_c signal");
        },
    };
    Ok(())
}

#[cfg(windows)]
pub async fn wait_signal() -> Result<(), DynError> {
    tokio::signal::ctrl_c().await?;
    info!("receive ctrl_c signal");
    Ok(())
}

fn unwrap_infallible<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => match err {},
    }
}
