//! KNXnet/IP gateway discovery via SEARCH_REQUEST.
//!
//! Finds gateways on the local network instead of requiring a hardcoded
//! address in the configuration.
//!
//! ```text
//! Client                          Gateway
//!   |                                |
//!   |------- SEARCH_REQUEST -------->| (multicast / broadcast)
//!   |<------ SEARCH_RESPONSE --------|
//! ```
//!
//! [`discover_gateway`] asks the KNX multicast group and the local
//! broadcast address; [`probe_gateway`] asks one candidate address
//! directly, which also works across routed segments where multicast
//! does not reach.

use core::time::Duration;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Instant;

use heapless::String;

use crate::error::Result;
use crate::protocol::constants::{
    ServiceType, KNXNETIP_DEFAULT_PORT, KNXNETIP_MULTICAST_ADDR, MAX_FRAME_SIZE,
};
use crate::protocol::frame::{FrameBuilder, Hpai, KnxnetIpFrame};

/// DIB type code for device information
const DIB_DEVICE_INFO: u8 = 0x01;

/// Size of a device information DIB: 24 bytes of fixed fields followed
/// by the 30-byte friendly name
const DEVICE_DIB_SIZE: usize = 54;

/// Offset of the friendly name inside a device information DIB
const DEVICE_NAME_OFFSET: usize = 24;

/// Discovered KNX gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayInfo {
    /// Control endpoint the gateway answers on
    pub address: SocketAddrV4,
    /// Friendly device name from the search response; empty when the
    /// gateway sent none. The 30 ISO 8859-1 name bytes re-encode to at
    /// most 60 bytes of UTF-8.
    pub name: String<60>,
}

/// Search the local network for a KNXnet/IP gateway.
///
/// Sends a SEARCH_REQUEST to the KNX multicast group 224.0.23.12 and to
/// the local broadcast address, then waits up to `timeout` for the first
/// parseable SEARCH_RESPONSE. `local_ip` selects the interface to search
/// from and is advertised as the response endpoint.
///
/// # Example
///
/// ```no_run
/// use core::time::Duration;
/// use std::net::Ipv4Addr;
///
/// use knx_tunnel::discovery::discover_gateway;
///
/// let local_ip = Ipv4Addr::new(192, 168, 1, 20);
/// if let Some(gateway) = discover_gateway(local_ip, Duration::from_secs(3)) {
///     println!("found {} ({})", gateway.address, gateway.name);
/// }
/// ```
pub fn discover_gateway(local_ip: Ipv4Addr, timeout: Duration) -> Option<GatewayInfo> {
    let targets = [
        SocketAddrV4::new(Ipv4Addr::from(KNXNETIP_MULTICAST_ADDR), KNXNETIP_DEFAULT_PORT),
        SocketAddrV4::new(Ipv4Addr::BROADCAST, KNXNETIP_DEFAULT_PORT),
    ];
    run_search(local_ip, &targets, true, timeout)
}

/// Ask one candidate address whether a gateway answers there.
///
/// Unicast variant of [`discover_gateway`], usable to verify a
/// configured gateway address on startup.
pub fn probe_gateway(
    gateway: SocketAddrV4,
    local_ip: Ipv4Addr,
    timeout: Duration,
) -> Option<GatewayInfo> {
    run_search(local_ip, &[gateway], false, timeout)
}

fn run_search(
    local_ip: Ipv4Addr,
    targets: &[SocketAddrV4],
    broadcast: bool,
    timeout: Duration,
) -> Option<GatewayInfo> {
    let socket = match UdpSocket::bind((local_ip, 0)) {
        Ok(socket) => socket,
        Err(err) => {
            log::warn!("binding discovery socket on {local_ip} failed: {err}");
            return None;
        }
    };
    if broadcast {
        if let Err(err) = socket.set_broadcast(true) {
            log::debug!("enabling broadcast failed: {err}");
        }
    }
    let local = match socket.local_addr() {
        Ok(SocketAddr::V4(local)) => local,
        Ok(SocketAddr::V6(addr)) => {
            log::warn!("discovery socket bound to IPv6 address {addr}");
            return None;
        }
        Err(err) => {
            log::warn!("reading discovery socket address failed: {err}");
            return None;
        }
    };

    let mut request = [0u8; MAX_FRAME_SIZE];
    let len = match build_search_request(local, &mut request) {
        Ok(len) => len,
        Err(err) => {
            log::warn!("building search request failed: {err}");
            return None;
        }
    };
    for target in targets {
        if let Err(err) = socket.send_to(&request[..len], target) {
            log::debug!("search request to {target} failed: {err}");
        }
    }

    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; MAX_FRAME_SIZE];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            log::debug!("no gateway answered within {timeout:?}");
            return None;
        }
        if let Err(err) = socket.set_read_timeout(Some(remaining)) {
            log::warn!("setting discovery read timeout failed: {err}");
            return None;
        }

        match socket.recv_from(&mut buf) {
            Ok((len, SocketAddr::V4(source))) => {
                if let Some(gateway) = parse_search_response(&buf[..len], source) {
                    log::info!("found gateway {} ({})", gateway.address, gateway.name);
                    return Some(gateway);
                }
                log::debug!("ignoring unrelated datagram from {source}");
            }
            Ok((_, source)) => log::debug!("ignoring datagram from non-IPv4 source {source}"),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(err) => {
                log::warn!("discovery receive failed: {err}");
                return None;
            }
        }
    }
}

/// SEARCH_REQUEST: header plus the response endpoint HPAI
fn build_search_request(local: SocketAddrV4, buf: &mut [u8]) -> Result<usize> {
    let mut body = [0u8; Hpai::SIZE];
    Hpai::new(local.ip().octets(), local.port()).encode(&mut body)?;
    FrameBuilder::new(ServiceType::SearchRequest, &body).build(buf)
}

/// Parse a SEARCH_RESPONSE: the gateway's control endpoint HPAI followed
/// by DIB blocks, of which only the device information DIB is read (for
/// the friendly name).
fn parse_search_response(data: &[u8], source: SocketAddrV4) -> Option<GatewayInfo> {
    let frame = KnxnetIpFrame::parse(data).ok()?;
    if frame.service_type() != Some(ServiceType::SearchResponse) {
        return None;
    }
    let body = frame.body();
    let hpai = Hpai::parse(body.get(..Hpai::SIZE)?).ok()?;

    // NAT-mode gateways leave the HPAI unspecified; fall back to the
    // datagram source
    let address = if hpai.ip_address == [0, 0, 0, 0] {
        source
    } else {
        SocketAddrV4::new(Ipv4Addr::from(hpai.ip_address), hpai.port)
    };

    let mut name = String::new();
    let mut rest = body.get(Hpai::SIZE..)?;
    while rest.len() >= 2 {
        let dib_len = usize::from(rest[0]);
        if dib_len == 0 || dib_len > rest.len() {
            break;
        }
        if rest[1] == DIB_DEVICE_INFO && dib_len >= DEVICE_DIB_SIZE {
            let bytes = &rest[DEVICE_NAME_OFFSET..DEVICE_DIB_SIZE];
            for &byte in bytes.iter().take_while(|&&b| b != 0) {
                // The name field is ISO 8859-1, which maps 1:1 onto the
                // first Unicode block
                if name.push(char::from(byte)).is_err() {
                    break;
                }
            }
            break;
        }
        rest = &rest[dib_len..];
    }

    Some(GatewayInfo { address, name })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_response(name: &[u8]) -> Vec<u8> {
        let mut body = vec![0u8; Hpai::SIZE];
        Hpai::new([192, 168, 1, 250], 3671)
            .encode(&mut body)
            .unwrap();
        // An unrelated DIB (supported service families) before the
        // device information DIB
        body.extend_from_slice(&[0x04, 0x02, 0x02, 0x01]);
        let mut dib = vec![0u8; DEVICE_DIB_SIZE];
        dib[0] = DEVICE_DIB_SIZE as u8;
        dib[1] = DIB_DEVICE_INFO;
        dib[DEVICE_NAME_OFFSET..DEVICE_NAME_OFFSET + name.len()].copy_from_slice(name);
        body.extend_from_slice(&dib);

        let mut frame = vec![0u8; MAX_FRAME_SIZE];
        let len = FrameBuilder::new(ServiceType::SearchResponse, &body)
            .build(&mut frame)
            .unwrap();
        frame.truncate(len);
        frame
    }

    fn gateway_source() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 250), 3671)
    }

    #[test]
    fn test_search_request_layout() {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let local = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 29), 12345);
        let len = build_search_request(local, &mut buf).unwrap();

        assert_eq!(len, 14);
        assert_eq!(&buf[..8], &[0x06, 0x10, 0x02, 0x01, 0x00, 0x0E, 0x08, 0x01]);
        assert_eq!(&buf[8..12], &[192, 168, 1, 29]);
        assert_eq!(u16::from_be_bytes([buf[12], buf[13]]), 12345);
    }

    #[test]
    fn test_parse_response_reads_endpoint_and_name() {
        let data = sample_response(b"KNX IP Router");
        let info = parse_search_response(&data, gateway_source()).unwrap();

        assert_eq!(
            info.address,
            SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 250), 3671)
        );
        assert_eq!(info.name.as_str(), "KNX IP Router");
    }

    #[test]
    fn test_parse_response_reencodes_latin1_name() {
        let data = sample_response(b"Passerelle d\xE9mo");
        let info = parse_search_response(&data, gateway_source()).unwrap();
        assert_eq!(info.name.as_str(), "Passerelle démo");
    }

    #[test]
    fn test_parse_response_without_device_dib() {
        let mut body = vec![0u8; Hpai::SIZE];
        Hpai::new([192, 168, 1, 250], 3671)
            .encode(&mut body)
            .unwrap();
        let mut frame = vec![0u8; MAX_FRAME_SIZE];
        let len = FrameBuilder::new(ServiceType::SearchResponse, &body)
            .build(&mut frame)
            .unwrap();

        let info = parse_search_response(&frame[..len], gateway_source()).unwrap();
        assert!(info.name.is_empty());
    }

    #[test]
    fn test_parse_rejects_other_services() {
        let mut body = vec![0u8; Hpai::SIZE];
        Hpai::new([192, 168, 1, 250], 3671)
            .encode(&mut body)
            .unwrap();
        let mut frame = vec![0u8; MAX_FRAME_SIZE];
        let len = FrameBuilder::new(ServiceType::SearchRequest, &body)
            .build(&mut frame)
            .unwrap();

        assert!(parse_search_response(&frame[..len], gateway_source()).is_none());
    }

    #[test]
    fn test_parse_nat_hpai_falls_back_to_source() {
        let mut body = vec![0u8; Hpai::SIZE];
        Hpai::nat().encode(&mut body).unwrap();
        let mut frame = vec![0u8; MAX_FRAME_SIZE];
        let len = FrameBuilder::new(ServiceType::SearchResponse, &body)
            .build(&mut frame)
            .unwrap();

        let source = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 7), 3671);
        let info = parse_search_response(&frame[..len], source).unwrap();
        assert_eq!(info.address, source);
    }

    #[test]
    fn test_probe_finds_loopback_responder() {
        let responder = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let gateway_addr = match responder.local_addr().unwrap() {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(addr) => panic!("unexpected IPv6 bind {addr}"),
        };

        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; MAX_FRAME_SIZE];
            let (len, requester) = responder.recv_from(&mut buf).unwrap();
            let frame = KnxnetIpFrame::parse(&buf[..len]).unwrap();
            assert_eq!(frame.service_type(), Some(ServiceType::SearchRequest));

            let mut body = [0u8; Hpai::SIZE + DEVICE_DIB_SIZE];
            Hpai::new([127, 0, 0, 1], gateway_addr.port())
                .encode(&mut body)
                .unwrap();
            body[Hpai::SIZE] = DEVICE_DIB_SIZE as u8;
            body[Hpai::SIZE + 1] = DIB_DEVICE_INFO;
            let name = b"Test Gateway";
            let start = Hpai::SIZE + DEVICE_NAME_OFFSET;
            body[start..start + name.len()].copy_from_slice(name);

            let mut response = [0u8; MAX_FRAME_SIZE];
            let len = FrameBuilder::new(ServiceType::SearchResponse, &body)
                .build(&mut response)
                .unwrap();
            responder.send_to(&response[..len], requester).unwrap();
        });

        let found = probe_gateway(gateway_addr, Ipv4Addr::LOCALHOST, Duration::from_secs(5))
            .expect("no gateway discovered");
        assert_eq!(found.address, gateway_addr);
        assert_eq!(found.name.as_str(), "Test Gateway");
        handle.join().unwrap();
    }
}
