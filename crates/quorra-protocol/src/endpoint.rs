//! `host:port` endpoint parsing.
//!
//! Workers are told where their controller listens with a textual address.
//! The host must be an IP literal. Parsing never touches the network, so a
//! malformed address is rejected before any socket exists.

use std::net::{IpAddr, SocketAddr};

use crate::errors::ProtocolError;

/// Parse `host:port` into a socket address.
pub fn parse_endpoint(address: &str) -> Result<SocketAddr, ProtocolError> {
    let parts: Vec<&str> = address.split(':').collect();
    if parts.len() != 2 {
        return Err(ProtocolError::invalid_address(
            address,
            "must be a valid endpoint including the port number (host:port)",
        ));
    }

    let ip: IpAddr = parts[0].trim().parse().map_err(|_| {
        ProtocolError::invalid_address(address, format!("'{}' is not an IP address", parts[0]))
    })?;
    let port: u16 = parts[1].trim().parse().map_err(|_| {
        ProtocolError::invalid_address(address, format!("'{}' is not a valid port", parts[1]))
    })?;

    Ok(SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use std::net::Ipv4Addr;

    #[test]
    fn parses_ipv4_endpoint() {
        let addr = parse_endpoint("127.0.0.1:8500").unwrap();
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(addr.port(), 8500);
    }

    #[test]
    fn missing_port_is_rejected() {
        let err = parse_endpoint("127.0.0.1").unwrap_err();
        assert_matches!(err, ProtocolError::InvalidAddress { .. });
        assert!(err.to_string().contains("port number"));
    }

    #[test]
    fn too_many_parts_is_rejected() {
        assert_matches!(
            parse_endpoint("tcp://127.0.0.1:80"),
            Err(ProtocolError::InvalidAddress { .. })
        );
    }

    #[test]
    fn hostname_is_rejected() {
        let err = parse_endpoint("controller.local:80").unwrap_err();
        assert!(err.to_string().contains("not an IP address"));
    }

    #[test]
    fn port_out_of_range_is_rejected() {
        let err = parse_endpoint("10.0.0.1:70000").unwrap_err();
        assert!(err.to_string().contains("not a valid port"));
    }

    proptest! {
        #[test]
        fn valid_addresses_roundtrip(a in any::<u8>(), b in any::<u8>(), c in any::<u8>(), d in any::<u8>(), port in any::<u16>()) {
            let text = format!("{a}.{b}.{c}.{d}:{port}");
            let addr = parse_endpoint(&text).unwrap();
            prop_assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::new(a, b, c, d)));
            prop_assert_eq!(addr.port(), port);
        }

        #[test]
        fn wrong_part_count_always_fails(parts in proptest::collection::vec("[0-9]{1,3}", 0..6usize)) {
            prop_assume!(parts.len() != 2);
            let text = parts.join(":");
            prop_assert!(
                matches!(parse_endpoint(&text), Err(ProtocolError::InvalidAddress { .. })),
                "accepted malformed address {}",
                text
            );
        }
    }
}
