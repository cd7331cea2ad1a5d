//! Agency: the controller end of the control channel.
//!
//! The agency owns one listening socket. Before a worker is launched the
//! caller announces the identity it will carry with [`Agency::expect`]; when a
//! connection arrives, its first 16 bytes are read and the socket is handed to
//! whoever expects that identity. Connections from unknown identities are
//! dropped.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `remote_runner` | [`RemoteRunner`], a `TestEngineRunner` proxy over one connection |

pub mod remote_runner;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use quorra_core::AgentIdentity;
use quorra_protocol::JsonFrameCodec;
use quorra_protocol::handshake::read_identity;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::errors::AgencyError;

pub use remote_runner::RemoteRunner;

/// Upper bound on reading the identity bytes of a fresh connection.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type Pending = Arc<Mutex<HashMap<AgentIdentity, oneshot::Sender<TcpStream>>>>;

/// Listener that routes worker connections by identity.
#[derive(Debug)]
pub struct Agency {
    local_addr: SocketAddr,
    pending: Pending,
    codec: JsonFrameCodec,
    cancel: CancellationToken,
}

impl Agency {
    /// Bind `address` and start accepting.
    #[instrument(skip_all, fields(address = %address))]
    pub async fn bind(address: &str, max_frame_length: usize) -> Result<Self, AgencyError> {
        let bind_error = |source| AgencyError::Bind {
            address: address.to_string(),
            source,
        };
        let listener = TcpListener::bind(address).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        info!(%local_addr, "agency listening");

        let pending = Pending::default();
        let cancel = CancellationToken::new();
        let _ = tokio::spawn(accept_loop(listener, pending.clone(), cancel.clone()));

        Ok(Self {
            local_addr,
            pending,
            codec: JsonFrameCodec::with_max_frame_length(max_frame_length),
            cancel,
        })
    }

    /// Address workers should connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Announce a worker identity before launching it.
    pub fn expect(&self, identity: AgentIdentity) -> Registration {
        let (tx, rx) = oneshot::channel();
        if self.pending.lock().insert(identity, tx).is_some() {
            warn!(%identity, "identity was already expected; replacing");
        }
        Registration {
            identity,
            rx,
            pending: self.pending.clone(),
            codec: self.codec.clone(),
        }
    }

    /// Number of identities announced but not yet connected.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Stop accepting and fail every outstanding registration.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.pending.lock().clear();
    }
}

impl Drop for Agency {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A worker identity the agency is waiting for.
pub struct Registration {
    identity: AgentIdentity,
    rx: oneshot::Receiver<TcpStream>,
    pending: Pending,
    codec: JsonFrameCodec,
}

impl Registration {
    /// The expected identity.
    pub fn identity(&self) -> AgentIdentity {
        self.identity
    }

    /// Wait for the worker to connect and wrap its socket in a proxy.
    pub async fn connected(mut self, timeout: Duration) -> Result<RemoteRunner, AgencyError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(stream)) => Ok(RemoteRunner::new(self.identity, stream, self.codec.clone())),
            Ok(Err(_)) => Err(AgencyError::Closed),
            Err(_) => Err(AgencyError::RegistrationTimeout {
                identity: self.identity,
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let _ = self.pending.lock().remove(&self.identity);
    }
}

async fn accept_loop(listener: TcpListener, pending: Pending, cancel: CancellationToken) {
    loop {
        let (stream, peer) = tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            },
        };
        debug!(%peer, "connection accepted");
        let _ = tokio::spawn(register(stream, peer, pending.clone()));
    }
    debug!("agency stopped accepting");
}

async fn register(mut stream: TcpStream, peer: SocketAddr, pending: Pending) {
    let identity = match tokio::time::timeout(HANDSHAKE_TIMEOUT, read_identity(&mut stream)).await {
        Ok(Ok(identity)) => identity,
        Ok(Err(e)) => {
            warn!(%peer, error = %e, "identity handshake failed");
            return;
        }
        Err(_) => {
            warn!(%peer, "identity handshake timed out");
            return;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "could not disable nagle");
    }

    let waiter = pending.lock().remove(&identity);
    match waiter {
        Some(tx) => {
            if tx.send(stream).is_ok() {
                info!(agent_id = %identity, %peer, "agent registered");
            } else {
                debug!(agent_id = %identity, "registration abandoned before connect");
            }
        }
        None => warn!(agent_id = %identity, %peer, "dropping connection from unexpected agent"),
    }
}
