//! Startup log lines telling operators where the relay can be reached.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// First non-loopback IPv4 address of this host.
///
/// Connecting a UDP socket selects the outbound interface without sending
/// any packet. Returns `None` when the host has no routable IPv4 interface.
pub fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

/// Lines logged once the listener is bound.
///
/// On Render the public URL is announced; otherwise the LAN address.
pub fn startup_lines(
    port: u16,
    render: bool,
    external_url: Option<&str>,
    local_ip: Option<Ipv4Addr>,
) -> Vec<String> {
    let mut lines = vec![format!("Server running on port {port}")];
    if render {
        let url = external_url.unwrap_or("(external URL not set)");
        lines.push(format!("Deployed on Render at {url}"));
    } else {
        let host = local_ip.map_or_else(|| "localhost".to_string(), |ip| ip.to_string());
        lines.push(format!("For local network access, use: http://{host}:{port}"));
    }
    lines
}
