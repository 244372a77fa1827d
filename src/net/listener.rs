//! TCP listener with backpressure.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections
//! - Enforce max_connections via a semaphore
//! - Ride out per-connection and resource-exhaustion accept errors
//!
//! Only errors that mean the listening socket itself is broken reach the
//! caller as [`ListenerError::Accept`].

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),
}

/// Pause before accepting again after the process ran out of resources
/// (file descriptors, socket buffers).
const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// What a failed `accept` means for the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptFailure {
    /// One pending connection failed before it was handed over.
    Connection,
    /// A transient condition such as EMFILE or ENOBUFS.
    Resources,
    /// The listening socket is unusable.
    Fatal,
}

impl AcceptFailure {
    fn classify(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock => AcceptFailure::Connection,
            io::ErrorKind::NotConnected | io::ErrorKind::InvalidInput => AcceptFailure::Fatal,
            _ => AcceptFailure::Resources,
        }
    }
}

/// A bounded TCP listener that limits concurrent connections.
///
/// When the limit is reached, [`Listener::accept`] waits until a permit is
/// released before accepting another connection.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    /// Bind to `addr` (e.g. `0.0.0.0:4000`).
    pub async fn bind(addr: &str, max_connections: usize) -> Result<Self, ListenerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ListenerError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        Ok(Self::from_tcp(listener, max_connections))
    }

    /// Wrap an already bound listener.
    pub fn from_tcp(listener: TcpListener, max_connections: usize) -> Self {
        if let Ok(addr) = listener.local_addr() {
            tracing::debug!(address = %addr, max_connections, "Listener bound");
        }

        Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// The returned permit must be held for the connection's lifetime.
    /// Failures of a single pending connection are skipped; running out of
    /// file descriptors or buffers pauses accepting for [`ACCEPT_BACKOFF`].
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let permit = Arc::clone(&self.connection_limit)
            .acquire_owned()
            .await
            .map_err(|err| ListenerError::Accept(io::Error::new(io::ErrorKind::Other, err)))?;

        let (stream, addr) = loop {
            match self.inner.accept().await {
                Ok(accepted) => break accepted,
                Err(err) => match AcceptFailure::classify(&err) {
                    AcceptFailure::Connection => {
                        tracing::debug!(error = %err, "Pending connection failed before accept");
                    }
                    AcceptFailure::Resources => {
                        tracing::error!(
                            error = %err,
                            backoff_ms = ACCEPT_BACKOFF.as_millis() as u64,
                            "Accept failed, retrying after backoff"
                        );
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                    AcceptFailure::Fatal => return Err(ListenerError::Accept(err)),
                },
            }
        };

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// A connection slot. Dropping it releases the slot, even if the
/// connection task panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}
