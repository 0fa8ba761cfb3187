// Wake-on-LAN: magic packet over UDP broadcast

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};

use crate::error::FleetError;
use crate::models::Device;

/// Parse a MAC in any common notation (colons, dashes, bare hex).
pub fn parse_mac(mac: &str) -> Result<[u8; 6], String> {
    let hex: String = mac.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    if hex.len() != 12 {
        return Err(format!("expected 12 hex digits, got {}", hex.len()));
    }
    let mut out = [0u8; 6];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .map_err(|e| format!("bad hex at byte {i}: {e}"))?;
    }
    Ok(out)
}

/// 6 x 0xFF followed by the MAC sixteen times.
pub fn magic_packet(mac: [u8; 6]) -> [u8; 102] {
    let mut pkt = [0u8; 102];
    pkt[..6].fill(0xFF);
    for i in 0..16 {
        let base = 6 + i * 6;
        pkt[base..base + 6].copy_from_slice(&mac);
    }
    pkt
}

fn broadcast_addr(hint: Option<&str>) -> Ipv4Addr {
    hint.and_then(|s| s.parse::<Ipv4Addr>().ok())
        .unwrap_or(Ipv4Addr::new(255, 255, 255, 255))
}

/// Send the magic packet for `device` on UDP ports 9 and 7. Succeeds if at
/// least one send goes out.
pub fn wake(device: &Device) -> Result<(), FleetError> {
    let wol = device.wol.as_ref().ok_or_else(|| {
        FleetError::ConfigError(format!("device {:?} has no wol configured", device.id))
    })?;
    let mac = parse_mac(&wol.mac)
        .map_err(|e| FleetError::ConfigError(format!("device {:?}: {e}", device.id)))?;
    let pkt = magic_packet(mac);
    let bcast = broadcast_addr(wol.broadcast.as_deref());

    let sock = UdpSocket::bind(("0.0.0.0", 0))
        .map_err(|e| FleetError::ActionError(format!("wol socket: {e}")))?;
    sock.set_broadcast(true)
        .map_err(|e| FleetError::ActionError(format!("wol broadcast flag: {e}")))?;

    let mut sent = false;
    for port in [9u16, 7u16] {
        let addr = SocketAddrV4::new(bcast, port);
        match sock.send_to(&pkt, addr) {
            Ok(_) => sent = true,
            Err(e) => tracing::warn!(device = %device.id, port, error = %e, "wol send failed"),
        }
    }
    if sent {
        Ok(())
    } else {
        Err(FleetError::ActionError("wol send failed on all ports".into()))
    }
}
