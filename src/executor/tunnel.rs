// ABOUTME: TCP port forwarding from a local listener to a port on the transport's far end
// Each accepted connection is relayed on its own task so a stalled peer never blocks others

use super::{ExecError, TunnelCloser};
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Byte stream usable as the far side of a relay.
pub trait RelayStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> RelayStream for T {}

pub type BoxedRelayStream = Box<dyn RelayStream>;

/// Opens the far side of a relay for one accepted local connection.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn dial(&self, peer: SocketAddr) -> Result<BoxedRelayStream, ExecError>;
}

/// An open local listener forwarding to a single far-end port.
pub struct Tunnel {
    local_addr: SocketAddr,
    cancel: CancellationToken,
}

impl Tunnel {
    pub async fn open<D: Dialer>(local_port: u16, dialer: D) -> Result<Self, ExecError> {
        let listener = TcpListener::bind(("127.0.0.1", local_port)).await?;
        let local_addr = listener.local_addr()?;
        let cancel = CancellationToken::new();

        tokio::spawn(accept_loop(listener, dialer, cancel.clone()));

        info!("Tunnel listening on {}", local_addr);
        Ok(Self { local_addr, cancel })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl TunnelCloser for Tunnel {
    fn close(&self) -> Result<(), ExecError> {
        // Stops new accepts; relays already running drain on their own
        self.cancel.cancel();
        Ok(())
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Tunnel handed out where no forwarding is needed.
pub struct NoopTunnel;

impl TunnelCloser for NoopTunnel {
    fn close(&self) -> Result<(), ExecError> {
        Ok(())
    }
}

async fn accept_loop<D: Dialer>(listener: TcpListener, dialer: D, cancel: CancellationToken) {
    let dialer = std::sync::Arc::new(dialer);
    loop {
        let (socket, peer) = tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("Tunnel accept failed: {}", e);
                    continue;
                }
            },
        };

        debug!("Accepted tunnel connection from {}", peer);
        let dialer = dialer.clone();
        tokio::spawn(async move {
            match dialer.dial(peer).await {
                Ok(remote) => splice(socket, remote).await,
                Err(e) => warn!("Failed to open tunnel channel for {}: {}", peer, e),
            }
            debug!("Closed tunnel connection from {}", peer);
        });
    }
    debug!("Tunnel accept loop stopped");
}

/// Copy bytes both ways until either side closes.
pub async fn splice<L, R>(local: L, remote: R)
where
    L: AsyncRead + AsyncWrite + Send + Unpin,
    R: AsyncRead + AsyncWrite + Send + Unpin,
{
    let (mut local_read, mut local_write) = tokio::io::split(local);
    let (mut remote_read, mut remote_write) = tokio::io::split(remote);

    tokio::select! {
        result = tokio::io::copy(&mut local_read, &mut remote_write) => {
            if let Err(e) = result {
                debug!("Tunnel upstream copy ended: {}", e);
            }
        }
        result = tokio::io::copy(&mut remote_read, &mut local_write) => {
            if let Err(e) = result {
                debug!("Tunnel downstream copy ended: {}", e);
            }
        }
    }
}
