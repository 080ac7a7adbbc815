//! DHCP capability probe
//!
//! Checks whether a host answers DHCP by sending a DISCOVER through the relay
//! and waiting for a reply carrying the same transaction id. Replies meant
//! for other relay clients arrive on the same connection and are skipped.

use super::RelayClient;
use crate::config::ProbeConfig;
use crate::protocol::{dhcp, RelayRequest};
use anyhow::{bail, Result};
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Random locally administered unicast hardware address
fn probe_hwaddr() -> [u8; 6] {
    let mut hwaddr: [u8; 6] = rand::random();
    hwaddr[0] = (hwaddr[0] & 0xfe) | 0x02;
    hwaddr
}

/// Probe `target` for a DHCP server through the relay at `relay_addr`
///
/// Makes up to `retries + 1` attempts, each waiting `timeout` for a reply.
/// Returns the response time of the first matching reply, or `None` if the
/// host never answered.
pub async fn is_server(
    relay_addr: &str,
    target: Ipv4Addr,
    timeout: Duration,
    retries: u32,
) -> Result<Option<Duration>> {
    let mut client = RelayClient::connect(relay_addr).await?;
    let hwaddr = probe_hwaddr();

    for attempt in 1..=retries.saturating_add(1) {
        let xid: u32 = rand::random();
        let started = Instant::now();
        let deadline = started + timeout;

        debug!(
            "Sending DHCPDISCOVER to {} (xid=0x{:08x}, attempt {})",
            target, xid, attempt
        );
        client
            .send_request(RelayRequest::new(target, dhcp::build_discover(xid, hwaddr)))
            .await?;

        loop {
            let msg = match tokio::time::timeout_at(deadline, client.next_message()).await {
                Err(_elapsed) => break,
                Ok(msg) => msg?,
            };
            let Some(msg) = msg else {
                bail!("Relay closed the connection");
            };

            if dhcp::reply_xid(&msg.payload) == Some(xid) {
                let elapsed = started.elapsed();
                debug!("{} answered in {:?}", msg.source, elapsed);
                client.close().await?;
                return Ok(Some(elapsed));
            }
            trace!("Ignoring response from {} not matching xid", msg.source);
        }
    }

    debug!("No DHCP response from {}", target);
    client.close().await?;
    Ok(None)
}

/// [`is_server`] using the relay address, timeout and retries from `config`
pub async fn is_server_with_defaults(
    config: &ProbeConfig,
    target: Ipv4Addr,
) -> Result<Option<Duration>> {
    is_server(&config.relay_addr, target, config.timeout(), config.retries).await
}
