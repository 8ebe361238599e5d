use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::error::ConnectionError;

/// Resolve an operator-entered device address into a socket address on the
/// fixed controller port.
///
/// Only dotted-quad IPv4 is accepted; host names are not resolved.
pub fn resolve_target(address: &str, port: u16) -> Result<SocketAddr, ConnectionError> {
    let trimmed = address.trim();
    let invalid = || ConnectionError::InvalidAddress(address.to_string());

    if !is_dotted_quad(trimmed) {
        return Err(invalid());
    }

    let ip: Ipv4Addr = trimmed.parse().map_err(|_| invalid())?;
    Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
}

fn is_dotted_quad(value: &str) -> bool {
    let groups: Vec<&str> = value.split('.').collect();
    groups.len() == 4
        && groups
            .iter()
            .all(|group| (1..=3).contains(&group.len()) && group.bytes().all(|b| b.is_ascii_digit()))
}
