//! HTTP server and process lifecycle.
//!
//! # Responsibilities
//! - Bind the listener and run the accept loop on the calling task
//! - Serve each connection on its own task (HTTP/1.1 and HTTP/2)
//! - Arm the termination-signal watcher before the first accept
//! - Drain on shutdown and reconcile the accept loop with the drain outcome
//!
//! # Design Decisions
//! - The accept loop returns [`ServerError::Closed`] when the drain starts;
//!   that is the expected path, every other error is terminal
//! - The drain outcome travels on a oneshot channel, so it is produced and
//!   consumed at most once
//! - Shutdown never cancels requests or background tasks, it only waits

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::Request,
    Router,
};
use hyper::body::Incoming;
use hyper_util::{
    rt::{TokioExecutor, TokioIo, TokioTimer},
    server::conn::auto::Builder,
    service::TowerToHyperService,
};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tower::ServiceExt;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::ServerConfig;
use crate::lifecycle::counter::CountGuard;
use crate::lifecycle::shutdown::{Drain, ServerState, ShutdownError};
use crate::lifecycle::signals::{Signal, SignalWatcher};
use crate::lifecycle::tasks::BackgroundTasks;
use crate::net::connection::{ConnectionGuard, ConnectionTracker};
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::observability::logging::Logger;
use crate::observability::metrics;
use crate::props;

/// Errors that end [`Server::serve`].
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Bind or accept failure. No drain is attempted.
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("failed to install signal handlers: {0}")]
    Signal(#[source] std::io::Error),
    /// The listener was closed by a graceful shutdown.
    #[error("server closed")]
    Closed,
    /// The drain did not complete.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

impl ServerError {
    /// Whether this is the expected result of a graceful shutdown starting.
    pub fn is_closed(&self) -> bool {
        matches!(self, ServerError::Closed)
    }
}

/// HTTP API server with graceful shutdown.
pub struct Server {
    config: ServerConfig,
    logger: Arc<Logger>,
    tasks: BackgroundTasks,
    router: Router,
    connections: ConnectionTracker,
    state: Arc<watch::Sender<ServerState>>,
}

impl Server {
    /// Create a server dispatching every request to `router`.
    ///
    /// Background work spawned through `tasks` is awaited before a graceful
    /// shutdown completes.
    pub fn new(config: ServerConfig, logger: Arc<Logger>, tasks: BackgroundTasks, router: Router) -> Self {
        let router = Self::build_router(router);
        let (state, _) = watch::channel(ServerState::Running);

        Self {
            config,
            logger,
            tasks,
            router,
            connections: ConnectionTracker::new(),
            state: Arc::new(state),
        }
    }

    /// Wrap the application router with the standard middleware stack.
    ///
    /// Handlers are never cancelled; the shutdown grace period is the only
    /// deadline a request is held to.
    fn build_router(router: Router) -> Router {
        router
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Subscribe to lifecycle state changes.
    pub fn state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Bind the configured address and serve until SIGINT or SIGTERM has
    /// been handled.
    pub async fn serve(self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        let signals = SignalWatcher::install().map_err(ServerError::Signal)?;
        self.run(listener, signals.recv()).await
    }

    /// Serve on `listener` until `shutdown_signal` resolves, then drain.
    ///
    /// Returns `Ok(())` only after in-flight requests finished within the
    /// grace period and every background task completed.
    pub async fn run<S>(self, listener: Listener, shutdown_signal: S) -> Result<(), ServerError>
    where
        S: Future<Output = Signal> + Send + 'static,
    {
        let addr = self.local_addr(&listener)?;
        let _ = self.logger.info(
            "starting server",
            &props! { "env" => self.config.env, "addr" => addr },
        );

        // Taken before the watcher exists so the drain always waits for the
        // accept loop to let go of the listener.
        let listening = self.connections.hold_listener();
        let (done_tx, done_rx) = oneshot::channel();
        let drain = Drain {
            logger: Arc::clone(&self.logger),
            state: Arc::clone(&self.state),
            connections: self.connections.clone(),
            tasks: self.tasks.clone(),
            grace: self.config.shutdown.grace_period(),
            addr,
        };
        tokio::spawn(drain.run(shutdown_signal, done_tx));

        let err = self.accept_loop(listener, listening).await;
        if !err.is_closed() {
            return Err(err);
        }

        match done_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => return Err(ShutdownError::WatcherLost.into()),
        }

        self.state.send_replace(ServerState::Stopped);
        let _ = self.logger.info("stopped server", &props! { "addr" => addr });
        Ok(())
    }

    /// Bind the configured address and serve without signal handling or a
    /// drain. Returns when accepting fails.
    pub async fn serve_simple(self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.run_simple(listener).await
    }

    /// Serve on `listener` until accepting fails.
    pub async fn run_simple(self, listener: Listener) -> Result<(), ServerError> {
        let addr = self.local_addr(&listener)?;
        let _ = self.logger.info(
            "starting server",
            &props! { "env" => self.config.env, "addr" => addr },
        );

        let listening = self.connections.hold_listener();
        Err(self.accept_loop(listener, listening).await)
    }

    async fn bind(&self) -> Result<Listener, ServerError> {
        let listener = Listener::bind(
            &self.config.bind_address(),
            self.config.listener.max_connections,
        )
        .await?;
        Ok(listener)
    }

    fn local_addr(&self, listener: &Listener) -> Result<SocketAddr, ServerError> {
        listener.local_addr().map_err(|source| {
            ServerError::Listener(ListenerError::Bind {
                addr: self.config.bind_address(),
                source,
            })
        })
    }

    /// Accept until the drain starts or accepting fails.
    ///
    /// Never returns success: the result is either [`ServerError::Closed`] or
    /// a real failure. The listener is dropped (closed) on return.
    async fn accept_loop(&self, listener: Listener, _listening: CountGuard) -> ServerError {
        let mut state = self.state.subscribe();
        let read_header_timeout = Duration::from_secs(self.config.timeouts.read_header_secs);

        loop {
            let accepted = tokio::select! {
                biased;
                _ = draining(&mut state) => return ServerError::Closed,
                accepted = listener.accept() => accepted,
            };

            let (stream, peer, permit) = match accepted {
                Ok(connection) => connection,
                Err(err) => return err.into(),
            };

            metrics::record_connection_accepted();
            let guard = self.connections.track();
            tracing::trace!(connection_id = %guard.id(), peer_addr = %peer, "Serving connection");

            tokio::spawn(serve_connection(
                stream,
                peer,
                self.router.clone(),
                self.state.subscribe(),
                read_header_timeout,
                guard,
                permit,
            ));
        }
    }
}

/// Resolve once the server has left the `Running` state.
async fn draining(state: &mut watch::Receiver<ServerState>) {
    let _ = state.wait_for(|s| *s != ServerState::Running).await;
}

/// Serve one connection until the client closes it or the drain finishes it.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Router,
    mut state: watch::Receiver<ServerState>,
    read_header_timeout: Duration,
    guard: ConnectionGuard,
    _permit: ConnectionPermit,
) {
    let service = TowerToHyperService::new(router.map_request(move |request: Request<Incoming>| {
        let mut request = request.map(Body::new);
        request.extensions_mut().insert(ConnectInfo(peer));
        request
    }));

    let mut builder = Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(read_header_timeout);

    let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let mut shutting_down = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(err) = result {
                    tracing::debug!(connection_id = %guard.id(), error = %err, "Connection ended with error");
                }
                break;
            }
            _ = draining(&mut state), if !shutting_down => {
                // Finish the in-flight request, then close instead of keeping alive.
                shutting_down = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}
