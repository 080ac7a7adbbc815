//! Test utilities for dhcpmux
//!
//! This module provides common test utilities used across integration tests.

#![allow(dead_code)]

use dhcpmux::config::RelayConfig;
use dhcpmux::lifecycle::Fiber;
use dhcpmux::relay::RelayController;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

/// Default wait used by assertions on asynchronous effects
pub const WAIT: Duration = Duration::from_secs(1);

/// Test configuration builder
pub struct TestConfigBuilder {
    server_port: u16,
    max_payload: u32,
    outbound_queue: usize,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        TestConfigBuilder {
            server_port: 67,
            max_payload: 65507,
            outbound_queue: 64,
        }
    }
}

impl TestConfigBuilder {
    /// Create a new test config builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Port requests are forwarded to
    pub fn server_port(mut self, port: u16) -> Self {
        self.server_port = port;
        self
    }

    /// Largest accepted request payload
    pub fn max_payload(mut self, max: u32) -> Self {
        self.max_payload = max;
        self
    }

    /// Per-session delivery queue depth
    pub fn outbound_queue(mut self, depth: usize) -> Self {
        self.outbound_queue = depth;
        self
    }

    /// Build a loopback-only configuration on ephemeral ports
    pub fn build(self) -> RelayConfig {
        RelayConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            udp_bind_ip: "127.0.0.1".parse().unwrap(),
            server_port: self.server_port,
            client_port: 0,
            poll_interval_ms: 50,
            max_payload: self.max_payload,
            outbound_queue: self.outbound_queue,
            nodelay: true,
        }
    }
}

/// A UDP socket standing in for a DHCP server
pub async fn fake_dhcp_server() -> (UdpSocket, u16) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    (socket, port)
}

/// A started controller plus its bound addresses
pub async fn start_relay(config: RelayConfig) -> (RelayController, SocketAddr, SocketAddr) {
    let controller = RelayController::new(config);
    controller.start().await.unwrap();
    let tcp = controller.local_addr().await.unwrap();
    let udp = controller.receiver_addr().await.unwrap();
    (controller, tcp, udp)
}

/// Encode a client-to-relay frame by hand
pub fn request_frame(target: Ipv4Addr, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + payload.len());
    buf.extend_from_slice(&target.octets());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Read one relay-to-client frame by hand
pub async fn read_frame(stream: &mut TcpStream) -> (Ipv4Addr, Vec<u8>) {
    let mut header = [0u8; 8];
    tokio::time::timeout(WAIT, stream.read_exact(&mut header))
        .await
        .expect("timed out waiting for frame")
        .unwrap();
    let source = Ipv4Addr::new(header[0], header[1], header[2], header[3]);
    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;

    let mut payload = vec![0u8; len];
    tokio::time::timeout(WAIT, stream.read_exact(&mut payload))
        .await
        .expect("timed out waiting for payload")
        .unwrap();
    (source, payload)
}

/// Send the termination frame
pub async fn send_sentinel(stream: &mut TcpStream) {
    stream.write_all(&[0u8; 8]).await.unwrap();
}

/// Whether the peer closed `stream` within [`WAIT`]
pub async fn is_closed(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 1];
    match tokio::time::timeout(WAIT, stream.read(&mut buf)).await {
        Ok(Ok(0)) | Ok(Err(_)) => true,
        _ => false,
    }
}

/// Poll `cond` until it holds or [`WAIT`] elapses
pub async fn wait_until<F: Fn() -> bool>(cond: F) -> bool {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = TestConfigBuilder::new()
            .server_port(1067)
            .max_payload(512)
            .outbound_queue(4)
            .build();

        assert_eq!(config.server_port, 1067);
        assert_eq!(config.max_payload, 512);
        assert_eq!(config.outbound_queue, 4);
        assert_eq!(config.client_port, 0);
    }

    #[test]
    fn test_request_frame() {
        let frame = request_frame(Ipv4Addr::new(192, 0, 2, 1), b"abc");
        assert_eq!(frame, vec![192, 0, 2, 1, 0, 0, 0, 3, b'a', b'b', b'c']);
    }
}
