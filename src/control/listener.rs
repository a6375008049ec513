//! UDP control-channel listener
//!
//! Receives control datagrams and hands each decoded message to a
//! [`ControlHandler`]. Every receive is bounded by a timeout and raced
//! against the shutdown token, so shutdown is observed within one cycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::message::ControlMessage;
use crate::error::Result;

/// Receiver of decoded control messages.
#[async_trait]
pub trait ControlHandler: Send + Sync + 'static {
    async fn handle(&self, message: ControlMessage, from: SocketAddr);
}

#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub bind_addr: SocketAddr,
    pub recv_timeout: Duration,
    pub max_datagram_bytes: usize,
}

/// Bound control socket.
pub struct ControlListener {
    socket: UdpSocket,
    settings: ListenerSettings,
}

impl ControlListener {
    /// Bind the control socket with address reuse enabled.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(settings: ListenerSettings) -> Result<Self> {
        let addr = settings.bind_addr;
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        let socket = UdpSocket::from_std(socket.into())?;

        info!(addr = %socket.local_addr()?, "[ControlListener] Listening for control datagrams");
        Ok(Self { socket, settings })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive and dispatch until `shutdown` fires.
    ///
    /// Messages are handled inline, one at a time, in arrival order.
    pub async fn run<H: ControlHandler>(self, handler: Arc<H>, shutdown: CancellationToken) {
        let mut buf = vec![0u8; self.settings.max_datagram_bytes.max(1)];
        let mut received: u64 = 0;

        loop {
            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                r = tokio::time::timeout(self.settings.recv_timeout, self.socket.recv_from(&mut buf)) => r,
            };

            let (len, from) = match result {
                Ok(Ok(datagram)) => datagram,
                Ok(Err(e)) => {
                    // ICMP port-unreachable from an earlier send surfaces here on some platforms.
                    warn!("[ControlListener] Receive error: {}", e);
                    continue;
                }
                Err(_) => continue,
            };

            received += 1;
            let message = ControlMessage::from_datagram(&buf[..len]);
            match &message {
                ControlMessage::Unrecognized(text) => {
                    warn!(from = %from, "[ControlListener] Unrecognized message: {:?}", text);
                }
                other => {
                    debug!(from = %from, kind = other.kind(), "[ControlListener] Control message");
                    handler.handle(message, from).await;
                }
            }
        }

        info!(received, "[ControlListener] Shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::sender::send_control;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<ControlMessage>>,
    }

    #[async_trait]
    impl ControlHandler for Recorder {
        async fn handle(&self, message: ControlMessage, _from: SocketAddr) {
            self.seen.lock().await.push(message);
        }
    }

    fn settings() -> ListenerSettings {
        ListenerSettings {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            recv_timeout: Duration::from_millis(50),
            max_datagram_bytes: 1024,
        }
    }

    #[tokio::test]
    async fn test_dispatches_recognized_messages_in_order() {
        let listener = ControlListener::bind(settings()).unwrap();
        let addr = listener.local_addr().unwrap();
        let recorder = Arc::new(Recorder::default());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(listener.run(recorder.clone(), shutdown.clone()));

        send_control(addr, &ControlMessage::Start).await.unwrap();
        send_control(addr, &ControlMessage::Unrecognized("PING".into())).await.unwrap();
        send_control(addr, &ControlMessage::Stop { payload: String::new() }).await.unwrap();

        for _ in 0..50 {
            if recorder.seen.lock().await.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        task.await.unwrap();

        let seen = recorder.seen.lock().await;
        assert_eq!(
            *seen,
            vec![
                ControlMessage::Start,
                ControlMessage::Stop { payload: String::new() }
            ]
        );
    }

    #[tokio::test]
    async fn test_shutdown_while_idle() {
        let listener = ControlListener::bind(settings()).unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(listener.run(Arc::new(Recorder::default()), shutdown.clone()));
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
