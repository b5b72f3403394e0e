// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multicast interface selection and group membership.

use std::io;
use std::net::{IpAddr, Ipv4Addr};

use socket2::Socket;

/// Resolve the interface used to join groups.
///
/// Accepts an IPv4 address or an interface name; `None` lets the kernel
/// pick (`INADDR_ANY`).
pub fn resolve_interface(interface: Option<&str>) -> io::Result<Ipv4Addr> {
    let Some(name) = interface.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(Ipv4Addr::UNSPECIFIED);
    };
    if let Ok(addr) = name.parse::<Ipv4Addr>() {
        return Ok(addr);
    }

    let interfaces = local_ip_address::list_afinet_netifas().map_err(|e| {
        io::Error::new(
            io::ErrorKind::Other,
            format!("failed to list network interfaces: {}", e),
        )
    })?;
    for (ifname, ip) in interfaces {
        if let IpAddr::V4(ipv4) = ip {
            if ifname == name {
                log::debug!("[UDP] interface {} resolved to {}", name, ipv4);
                return Ok(ipv4);
            }
        }
    }

    Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("no IPv4 address on interface {}", name),
    ))
}

/// Join `group` on `iface`, tolerating an existing membership.
pub fn join_group(socket: &Socket, group: Ipv4Addr, iface: Ipv4Addr) -> io::Result<()> {
    if !group.is_multicast() {
        log::debug!("[UDP] {} is not a multicast group, no join", group);
        return Ok(());
    }
    match socket.join_multicast_v4(&group, &iface) {
        Ok(()) => {
            log::debug!("[UDP] join_multicast_v4({}) on interface {}", group, iface);
            Ok(())
        }
        Err(e) if e.raw_os_error() == Some(98) => {
            // EADDRINUSE (98) Linux: already joined on same physical NIC
            log::debug!(
                "[UDP] join_multicast_v4({}) on {} - already joined, skipping",
                group,
                iface
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_defaults_and_literals() {
        assert_eq!(resolve_interface(None).unwrap(), Ipv4Addr::UNSPECIFIED);
        assert_eq!(resolve_interface(Some("  ")).unwrap(), Ipv4Addr::UNSPECIFIED);
        assert_eq!(
            resolve_interface(Some("192.168.1.7")).unwrap(),
            Ipv4Addr::new(192, 168, 1, 7)
        );
    }

    #[test]
    fn test_resolve_unknown_name() {
        assert!(resolve_interface(Some("no-such-interface-0")).is_err());
    }
}
