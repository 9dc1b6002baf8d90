//! SSDP M-SEARCH discovery of Sonos ZonePlayers.
//!
//! One UDP socket is opened per usable IPv4 interface. The same socket sends
//! the search and receives replies, since speakers answer unicast to the
//! sender's address and port.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use local_ip_address::list_afinet_netifas;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use super::{DiscoveryError, DiscoveryResult};
use crate::protocol_constants::{
    SONOS_DEFAULT_PORT, SONOS_SEARCH_TARGET, SSDP_MULTICAST_ADDR, SSDP_MX_SECS,
};
use crate::sonos::types::SonosDevice;
use crate::sonos::utils::parse_location;

/// Interface name prefixes that never reach the speakers' LAN.
const VIRTUAL_INTERFACE_PREFIXES: &[&str] = &[
    "lo", "docker", "veth", "br-", "virbr", "vmnet", "vbox", "tun", "tap",
];

// ─────────────────────────────────────────────────────────────────────────────
// ASCII Case-Insensitive Helpers
// ─────────────────────────────────────────────────────────────────────────────

#[inline]
fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle.as_bytes()))
}

/// Returns the trimmed value of the first header called `name`.
fn header_value<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    response.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────────────────

/// Builds the M-SEARCH datagram for ZonePlayers.
fn build_msearch_message(mx: u64) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {SSDP_MULTICAST_ADDR}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {mx}\r\n\
         ST: {SONOS_SEARCH_TARGET}\r\n\r\n"
    )
}

/// Parses one SSDP reply into a device record.
///
/// The reply must carry `ST` equal to the ZonePlayer search target and a
/// `USN` of the form `uuid:<UUID>::...`. The host is the datagram's sender;
/// the port comes from `Location` (1400 when absent or unparseable).
pub(crate) fn parse_ssdp_response(response: &str, src_ip: &str) -> Option<SonosDevice> {
    let st = header_value(response, "st")?;
    if !st.eq_ignore_ascii_case(SONOS_SEARCH_TARGET) {
        return None;
    }

    let usn = header_value(response, "usn")?;
    let idx = find_ignore_ascii_case(usn, "uuid:")?;
    let uuid = usn[idx + 5..].split("::").next()?.trim();
    if uuid.is_empty() {
        return None;
    }

    let location = header_value(response, "location").unwrap_or_default();
    let port = parse_location(location)
        .map(|(_, port)| port)
        .unwrap_or(SONOS_DEFAULT_PORT);

    let model = header_value(response, "server")
        .and_then(|s| {
            let idx = find_ignore_ascii_case(s, "sonos/")?;
            Some(s[idx..].to_string())
        })
        .unwrap_or_default();

    Some(SonosDevice {
        ip: src_ip.to_string(),
        port,
        uuid: uuid.to_string(),
        model,
        name: String::new(),
        location: location.to_string(),
        last_seen: Utc::now(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Sockets
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct InterfaceInfo {
    name: String,
    ip: Ipv4Addr,
}

fn is_virtual_interface(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    VIRTUAL_INTERFACE_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// Lists non-loopback, non-virtual IPv4 interfaces.
fn get_interfaces() -> Vec<InterfaceInfo> {
    list_afinet_netifas()
        .unwrap_or_else(|e| {
            log::warn!("[SSDP] Failed to list network interfaces: {}", e);
            Vec::new()
        })
        .into_iter()
        .filter_map(|(name, addr)| match addr {
            IpAddr::V4(ip) if !ip.is_loopback() && !is_virtual_interface(&name) => {
                Some(InterfaceInfo { name, ip })
            }
            _ => None,
        })
        .collect()
}

fn create_socket(iface_ip: Ipv4Addr) -> DiscoveryResult<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(DiscoveryError::SocketBind)?;

    if let Err(e) = socket.set_reuse_address(true) {
        log::warn!("[SSDP] Failed to set SO_REUSEADDR on {}: {}", iface_ip, e);
    }
    // UPnP recommends a TTL of 4 for SSDP
    if let Err(e) = socket.set_multicast_ttl_v4(4) {
        log::warn!("[SSDP] Failed to set multicast TTL on {}: {}", iface_ip, e);
    }

    socket
        .set_nonblocking(true)
        .map_err(DiscoveryError::SocketBind)?;
    socket
        .bind(&SocketAddr::new(IpAddr::V4(iface_ip), 0).into())
        .map_err(DiscoveryError::SocketBind)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(DiscoveryError::SocketBind)
}

// ─────────────────────────────────────────────────────────────────────────────
// Search
// ─────────────────────────────────────────────────────────────────────────────

/// Sends one M-SEARCH per interface and collects replies until `window` ends.
///
/// Results are de-duplicated by UUID and sorted by UUID. Rooms are not named
/// yet; the caller fills names from zone topology.
pub async fn search(window: Duration) -> DiscoveryResult<Vec<SonosDevice>> {
    let mut sockets = Vec::new();
    for iface in get_interfaces() {
        match create_socket(iface.ip) {
            Ok(socket) => sockets.push((iface, Arc::new(socket))),
            Err(e) => log::warn!(
                "[SSDP] Failed to create socket for {} ({}): {}",
                iface.name,
                iface.ip,
                e
            ),
        }
    }

    if sockets.is_empty() {
        return Err(DiscoveryError::NoInterfaces);
    }

    log::debug!(
        "[SSDP] Searching on {} interface(s) for {}ms",
        sockets.len(),
        window.as_millis()
    );

    let msg = build_msearch_message(SSDP_MX_SECS);
    let discovered: Arc<Mutex<Vec<SonosDevice>>> = Arc::new(Mutex::new(Vec::new()));

    let send_futures = sockets.iter().map(|(iface, socket)| {
        let socket = Arc::clone(socket);
        let msg = msg.as_bytes().to_vec();
        let name = iface.name.clone();
        async move {
            socket
                .send_to(&msg, SSDP_MULTICAST_ADDR)
                .await
                .map(|_| ())
                .map_err(|e| {
                    log::warn!("[SSDP] Failed to send M-SEARCH on {}: {}", name, e);
                    DiscoveryError::SendSearch(e)
                })
        }
    });

    let recv_futures = sockets.iter().map(|(iface, socket)| {
        let socket = Arc::clone(socket);
        let discovered = Arc::clone(&discovered);
        let name = iface.name.clone();
        async move {
            let mut buf = [0u8; 2048];
            let start = tokio::time::Instant::now();
            while start.elapsed() < window {
                let remaining = window.saturating_sub(start.elapsed());
                match timeout(remaining, socket.recv_from(&mut buf)).await {
                    Ok(Ok((amt, src))) => {
                        let response = String::from_utf8_lossy(&buf[..amt]);
                        if let Some(device) =
                            parse_ssdp_response(&response, &src.ip().to_string())
                        {
                            log::debug!(
                                "[SSDP] Found {} at {}:{} via {}",
                                device.uuid,
                                device.ip,
                                device.port,
                                name
                            );
                            discovered.lock().push(device);
                        }
                    }
                    Ok(Err(e)) => log::warn!("[SSDP] Recv error on {}: {}", name, e),
                    Err(_) => break,
                }
            }
        }
    });

    let (sent, _) = tokio::join!(
        futures::future::join_all(send_futures),
        futures::future::join_all(recv_futures)
    );

    let mut devices = std::mem::take(&mut *discovered.lock());

    // Only fail when every send failed and nothing answered
    if devices.is_empty() && !sent.is_empty() && sent.iter().all(Result::is_err) {
        if let Some(Err(e)) = sent.into_iter().next() {
            return Err(e);
        }
    }

    let mut seen = HashSet::new();
    devices.retain(|d| seen.insert(d.uuid.clone()));
    devices.sort_by(|a, b| a.uuid.cmp(&b.uuid));

    log::info!("[SSDP] Discovery complete: {} speaker(s)", devices.len());
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msearch_message_targets_zone_players() {
        let msg = build_msearch_message(2);
        assert!(msg.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(msg.contains("HOST: 239.255.255.250:1900\r\n"));
        assert!(msg.contains("MAN: \"ssdp:discover\"\r\n"));
        assert!(msg.contains("MX: 2\r\n"));
        assert!(msg.contains("ST: urn:schemas-upnp-org:device:ZonePlayer:1\r\n"));
        assert!(msg.ends_with("\r\n\r\n"));
    }

    #[test]
    fn parses_zone_player_reply() {
        let response = "HTTP/1.1 200 OK\r\n\
             CACHE-CONTROL: max-age = 1800\r\n\
             ST: urn:schemas-upnp-org:device:ZonePlayer:1\r\n\
             USN: uuid:RINCON_123::urn:schemas-upnp-org:device:ZonePlayer:1\r\n\
             Location: http://10.0.0.5:1400/xml\r\n\r\n";

        let device = parse_ssdp_response(response, "10.0.0.5").expect("device");
        assert_eq!(device.uuid, "RINCON_123");
        assert_eq!(device.ip, "10.0.0.5");
        assert_eq!(device.port, 1400);
        assert_eq!(device.location, "http://10.0.0.5:1400/xml");
    }

    #[test]
    fn host_comes_from_sender_and_port_from_location() {
        let response = "HTTP/1.1 200 OK\r\n\
             st: urn:schemas-upnp-org:device:ZonePlayer:1\r\n\
             usn: UUID:RINCON_9\r\n\
             LOCATION: http://192.168.1.99:1443/xml/device_description.xml\r\n\
             SERVER: Linux UPnP/1.0 Sonos/70.3-35220 (ZPS9)\r\n\r\n";

        let device = parse_ssdp_response(response, "10.0.0.7").expect("device");
        assert_eq!(device.ip, "10.0.0.7");
        assert_eq!(device.port, 1443);
        assert_eq!(device.uuid, "RINCON_9");
        assert_eq!(device.model, "Sonos/70.3-35220 (ZPS9)");
    }

    #[test]
    fn missing_location_defaults_port() {
        let response = "HTTP/1.1 200 OK\r\n\
             ST: urn:schemas-upnp-org:device:ZonePlayer:1\r\n\
             USN: uuid:RINCON_1::x\r\n\r\n";
        let device = parse_ssdp_response(response, "10.0.0.8").expect("device");
        assert_eq!(device.port, 1400);
    }

    #[test]
    fn rejects_other_search_targets() {
        let response = "HTTP/1.1 200 OK\r\n\
             ST: urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
             USN: uuid:RINCON_1::urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
             Location: http://10.0.0.5:1400/xml\r\n\r\n";
        assert!(parse_ssdp_response(response, "10.0.0.5").is_none());
    }

    #[test]
    fn rejects_reply_without_usn_uuid() {
        let response = "HTTP/1.1 200 OK\r\n\
             ST: urn:schemas-upnp-org:device:ZonePlayer:1\r\n\
             Location: http://10.0.0.5:1400/xml\r\n\r\n";
        assert!(parse_ssdp_response(response, "10.0.0.5").is_none());
    }

    #[test]
    fn case_insensitive_helpers() {
        assert_eq!(header_value("LOCATION: http://h:1/x\r\n", "location"), Some("http://h:1/x"));
        assert_eq!(find_ignore_ascii_case("USN: UUID:RINCON", "uuid:"), Some(5));
        assert_eq!(find_ignore_ascii_case("no match", "uuid:"), None);
        assert!(is_virtual_interface("docker0"));
        assert!(!is_virtual_interface("en0"));
    }
}
