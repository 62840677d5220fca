//! Probe strategies. The engine only needs something that turns one
//! `(host, port)` unit into a [`PortState`] within a deadline; the TCP
//! connect probe is the default strategy and others plug in the same way.

use crate::types::{PortState, Protocol};
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;

#[async_trait]
pub trait Probe: Send + Sync {
    /// Probe one unit. Must give up once `timeout` has elapsed.
    async fn probe(&self, host: IpAddr, port: u16, timeout: Duration) -> PortState;

    /// Protocol used to annotate results via [`crate::lookup::PortLookup`].
    fn protocol(&self) -> Protocol {
        Protocol::Tcp
    }
}

/// Full TCP handshake against the target.
///
/// Every connect error, not only an active refusal, is reported as
/// [`PortState::Closed`]. Unreachable hosts and networks therefore look the
/// same as a refused port.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnectProbe;

#[async_trait]
impl Probe for TcpConnectProbe {
    async fn probe(&self, host: IpAddr, port: u16, timeout: Duration) -> PortState {
        let addr = SocketAddr::new(host, port);
        match time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                drop(stream);
                PortState::Open
            }
            Ok(Err(err)) => {
                tracing::trace!(%addr, kind = ?err.kind(), "connect failed");
                PortState::Closed
            }
            Err(_) => PortState::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn listening_port_is_open() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = TcpConnectProbe
            .probe(IpAddr::V4(Ipv4Addr::LOCALHOST), port, Duration::from_secs(2))
            .await;
        assert_eq!(state, PortState::Open);
    }

    #[tokio::test]
    async fn refused_port_is_closed() {
        // grab a free port, then release it so nothing listens there
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let state = TcpConnectProbe
            .probe(IpAddr::V4(Ipv4Addr::LOCALHOST), port, Duration::from_secs(2))
            .await;
        assert_eq!(state, PortState::Closed);
    }
}
