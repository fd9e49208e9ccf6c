// crates/loka-mesh/src/wake.rs

//! Wake-on-LAN magic packets
//!
//! The packet layout is fixed: 6 bytes of 0xFF followed by the 6-byte MAC
//! repeated 16 times, 102 bytes total, sent via UDP broadcast to port 9.

use anyhow::{anyhow, Result};
use log::info;
use tokio::net::UdpSocket;

pub const MAGIC_PACKET_LEN: usize = 102;
const WOL_PORT: u16 = 9;

/// Parse a MAC address accepting `:` or `-` separators (or none)
pub fn parse_mac(mac: &str) -> Result<[u8; 6]> {
    let hex: String = mac
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .collect();
    if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(anyhow!("invalid MAC address '{}'", mac));
    }
    let mut bytes = [0u8; 6];
    for (i, chunk) in hex.as_bytes().chunks_exact(2).enumerate() {
        let pair = std::str::from_utf8(chunk).expect("hex chars are utf8");
        bytes[i] = u8::from_str_radix(pair, 16).expect("validated hex digits");
    }
    Ok(bytes)
}

/// Build the 102-byte payload for a MAC address
pub fn build_magic_packet(mac: &str) -> Result<[u8; MAGIC_PACKET_LEN]> {
    let mac_bytes = parse_mac(mac)?;
    let mut packet = [0u8; MAGIC_PACKET_LEN];
    packet[..6].fill(0xFF);
    for repeat in 0..16 {
        let offset = 6 + repeat * 6;
        packet[offset..offset + 6].copy_from_slice(&mac_bytes);
    }
    Ok(packet)
}

/// Broadcast the wake packet for a sleeping node
pub async fn send_wake(mac: &str) -> Result<()> {
    let packet = build_magic_packet(mac)?;
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.set_broadcast(true)?;
    socket
        .send_to(&packet, ("255.255.255.255", WOL_PORT))
        .await?;
    info!("sent wake-on-lan packet for {}", mac);
    Ok(())
}
