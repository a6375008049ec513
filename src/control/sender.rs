//! Control-message sender, the remote experimenter's side of the channel

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::UdpSocket;

use super::message::ControlMessage;
use crate::error::Result;

/// Send one control datagram to a collector. Best effort: no reply, no retry.
pub async fn send_control(target: SocketAddr, message: &ControlMessage) -> Result<()> {
    let local: SocketAddr = if target.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(local).await?;
    let text = message.encode();
    socket.send_to(text.as_bytes(), target).await?;
    tracing::debug!(%target, kind = message.kind(), "Control message sent");
    Ok(())
}
