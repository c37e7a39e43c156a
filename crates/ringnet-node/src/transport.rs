//! UDP transport adapter.
//!
//! Each node listens on one endpoint and sends everything to one downstream
//! neighbour. The substrate is deliberately unreliable: no retries, no
//! acknowledgements here — loss recovery belongs to the ring protocol.
//!
//! The receive loop feeds raw datagrams into the engine's event channel; the
//! send loop drains the engine's outbox. Neither task touches engine state.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use ringnet_core::frame::MAX_DATAGRAM;

use crate::engine::Event;

/// A bound ring endpoint: our socket plus the resolved downstream address.
pub struct RingPort {
    pub socket: Arc<UdpSocket>,
    pub downstream: SocketAddr,
}

/// Bind the listen socket and resolve the downstream neighbour.
pub async fn bind(listen_port: u16, next_addr: &str) -> std::io::Result<RingPort> {
    let socket = UdpSocket::bind(("0.0.0.0", listen_port)).await?;
    let downstream = tokio::net::lookup_host(next_addr).await?.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("downstream address {next_addr:?} did not resolve"),
        )
    })?;
    debug!(listen_port, %downstream, "ring transport bound");
    Ok(RingPort {
        socket: Arc::new(socket),
        downstream,
    })
}

/// Read datagrams until shutdown and post them to the engine.
/// Receive errors are logged and the loop continues; hostile or truncated
/// input is the engine's problem to classify.
pub async fn recv_loop(
    socket: Arc<UdpSocket>,
    events: mpsc::Sender<Event>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, from)) => {
                    trace!(%from, len, "datagram received");
                    if events.send(Event::Datagram(buf[..len].to_vec())).await.is_err() {
                        break;
                    }
                }
                Err(error) => warn!(%error, "receive failed"),
            }
        }
    }
    debug!("receive loop stopped");
}

/// Drain the engine's outbox to the downstream neighbour. Ends when the
/// engine drops its outbox sender. Send failures are reported and the
/// datagram is abandoned; the engine never retries a send.
pub async fn send_loop(
    socket: Arc<UdpSocket>,
    downstream: SocketAddr,
    mut outbox: mpsc::Receiver<Vec<u8>>,
) {
    while let Some(bytes) = outbox.recv().await {
        trace!(len = bytes.len(), %downstream, "datagram sent");
        if let Err(error) = socket.send_to(&bytes, downstream).await {
            warn!(%error, %downstream, "send failed");
        }
    }
    debug!("send loop stopped");
}
