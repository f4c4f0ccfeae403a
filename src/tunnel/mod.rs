//! Threaded KNXnet/IP tunnel client.
//!
//! [`TunnelClient`] owns one UDP socket to a gateway and keeps a tunneling
//! connection alive on it: connect handshake, periodic connection-state
//! checks, sequence counters, acknowledgements and automatic reconnection
//! after any failure. A second, on-demand device-management channel shares
//! the same socket and is used by the relay to pass configuration traffic
//! (ETS device programming) through.
//!
//! ## Threading model
//!
//! One background thread owns every read on the socket. It drives the
//! connect and reconnect sequences, answers keep-alives and inbound
//! requests, and routes responses to waiting senders. Callers block only
//! in `send_*` methods, serialized so a single request is in flight per
//! socket, each wait bounded by [`TunnelConfig::response_timeout`].
//!
//! ```text
//!  caller threads                 receive thread              gateway
//!  --------------                 --------------              -------
//!  send_frame() --- request ----------------------------------->
//!       |  (registers waiter)          |<-------- TUNNELING_ACK
//!       |<------ resolved -------------|
//!       |  (waits for confirmation)    |<-------- L_Data.con
//!       |<------ resolved -------------|--------- ack --------->
//! ```
//!
//! ## Events
//!
//! Bus and management traffic is published on a [`std::sync::mpsc`]
//! channel handed over at construction. The channel has one consumer;
//! when the consumer is the [relay](crate::relay), application traffic
//! and relayed traffic are the same stream.

use core::time::Duration;
use std::net::{Ipv4Addr, SocketAddrV4};

use heapless::Vec;

use crate::protocol::cemi::CemiFrame;
use crate::protocol::constants::{KNXNETIP_DEFAULT_PORT, MAX_CEMI_SIZE};

mod client;
mod pending;

pub use client::TunnelClient;

/// Mutex lock that shrugs off poisoning. Every guarded value here is
/// protocol bookkeeping the reconnect path rebuilds from scratch, so a
/// panicked holder leaves nothing worth halting over.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Default wait for a response to any request (connect, ack, state check)
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default gap between connection-state keep-alive checks
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// Default pause before retrying a failed or lost connection
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(10);

/// Tunnel client settings.
///
/// Only [`gateway`](Self::gateway) normally needs to be set; the timing
/// fields default to the values above and exist so tests and unusual
/// deployments can shrink or stretch them.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TunnelConfig {
    /// Gateway control endpoint, usually port 3671
    pub gateway: SocketAddrV4,
    /// Local address to bind; port 0 lets the OS pick
    pub bind_address: SocketAddrV4,
    /// IP to advertise in HPAIs. `None` sends the NAT-mode wildcard HPAI
    /// and lets the gateway reply to the observed source address.
    pub advertised_ip: Option<Ipv4Addr>,
    /// Bound wait for connect responses, acknowledgements and state checks
    pub response_timeout: Duration,
    /// Gap between CONNECTIONSTATE_REQUEST keep-alives
    pub keepalive_interval: Duration,
    /// Pause between reconnect attempts
    pub reconnect_backoff: Duration,
}

impl TunnelConfig {
    /// Config for `gateway` with default timing
    pub fn new(gateway: SocketAddrV4) -> Self {
        Self {
            gateway,
            bind_address: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
            advertised_ip: None,
            response_timeout: RESPONSE_TIMEOUT,
            keepalive_interval: KEEPALIVE_INTERVAL,
            reconnect_backoff: RECONNECT_BACKOFF,
        }
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self::new(SocketAddrV4::new(
            Ipv4Addr::new(192, 168, 1, 10),
            KNXNETIP_DEFAULT_PORT,
        ))
    }
}

/// Events published by [`TunnelClient`].
#[derive(Debug, Clone)]
pub enum TunnelEvent {
    /// An `L_Data.ind` frame received from the bus
    Frame(CemiFrame),
    /// cEMI bytes of a DEVICE_CONFIGURATION_REQUEST from the gateway
    /// (management responses and notifications)
    Management(Vec<u8, MAX_CEMI_SIZE>),
    /// The connect handshake completed. Fired for the initial connection
    /// and after every automatic reconnect; state layered on top of the
    /// tunnel (group object caches, relay sessions) should resynchronize.
    Reconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = TunnelConfig::new(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 3671));
        assert_eq!(config.bind_address.port(), 0);
        assert_eq!(config.advertised_ip, None);
        assert_eq!(config.response_timeout, RESPONSE_TIMEOUT);
        assert_eq!(config.keepalive_interval, KEEPALIVE_INTERVAL);
        assert_eq!(config.reconnect_backoff, RECONNECT_BACKOFF);
    }

    #[test]
    fn test_default_gateway_port() {
        assert_eq!(TunnelConfig::default().gateway.port(), KNXNETIP_DEFAULT_PORT);
    }
}
