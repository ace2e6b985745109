//! Tello SDK link over UDP
//!
//! The Tello accepts plain-text commands on UDP port 8889 and answers each
//! with `ok`, `error ...`, or a value for `?` queries.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use super::{DroneCommand, DroneLink};
use crate::{Error, Result};

/// Default drone command address when connected to the Tello's Wi-Fi
pub const DEFAULT_TELLO_ADDR: &str = "192.168.10.1:8889";

/// Local port the drone replies to
const LOCAL_PORT: u16 = 8889;

/// Reply timeout for most commands
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Takeoff and landing take noticeably longer to acknowledge
const FLIGHT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(20);

/// UDP connection to a Tello drone
pub struct TelloLink {
    socket: Mutex<UdpSocket>,
}

impl TelloLink {
    /// Bind the local command port and target `addr`
    ///
    /// # Errors
    ///
    /// Returns error if the address is invalid or the port cannot be bound
    pub async fn bind(addr: &str) -> Result<Self> {
        let remote: SocketAddr = addr
            .parse()
            .map_err(|e| Error::Config(format!("invalid drone address {addr}: {e}")))?;

        let socket = UdpSocket::bind(("0.0.0.0", LOCAL_PORT)).await?;
        socket.connect(remote).await?;

        tracing::debug!(remote = %remote, local_port = LOCAL_PORT, "tello link bound");

        Ok(Self {
            socket: Mutex::new(socket),
        })
    }
}

#[async_trait]
impl DroneLink for TelloLink {
    async fn send(&self, command: DroneCommand) -> Result<String> {
        let socket = self.socket.lock().await;
        let text = command.to_sdk();

        // Discard late replies from a previous command that timed out
        let mut stale = [0u8; 1024];
        while socket.try_recv(&mut stale).is_ok() {}

        socket.send(text.as_bytes()).await?;
        tracing::trace!(command = %text, "sent to drone");

        let timeout = match command {
            DroneCommand::Takeoff | DroneCommand::Land => FLIGHT_TRANSITION_TIMEOUT,
            _ => COMMAND_TIMEOUT,
        };

        let mut buf = [0u8; 1024];
        let len = tokio::time::timeout(timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| Error::Actuator(format!("{text}: no reply within {timeout:?}")))??;

        let reply = String::from_utf8_lossy(&buf[..len]).trim().to_string();
        tracing::trace!(command = %text, reply = %reply, "drone replied");

        parse_reply(&text, reply)
    }
}

/// Interpret a Tello reply, mapping `error ...` to [`Error::Actuator`]
fn parse_reply(command: &str, reply: String) -> Result<String> {
    if reply.to_ascii_lowercase().starts_with("error") {
        return Err(Error::Actuator(format!("{command}: {reply}")));
    }
    Ok(reply)
}
