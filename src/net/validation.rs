//! Argument validation for external commands
//!
//! Interface names and address ranges end up as command-line arguments, so
//! they are checked against a strict allow-list before any process starts.

use std::net::IpAddr;

use ipnet::IpNet;

use crate::error::NetworkError;

/// Prefixes of the interface names this client creates
const INTERFACE_PREFIXES: &[&str] = &["utun", "wg", "tun"];

/// Maximum length for interface names (Linux kernel limit is 15)
const MAX_INTERFACE_NAME_LEN: usize = 15;

/// Accept `utunN`, `wgN` and `tunN` only
pub fn validate_interface_name(name: &str) -> Result<(), NetworkError> {
    let invalid = || NetworkError::InvalidInterfaceName {
        name: name.to_string(),
    };

    if name.len() > MAX_INTERFACE_NAME_LEN {
        return Err(invalid());
    }

    // "utun" is tried before "tun" so the digit check sees the right suffix
    let digits = INTERFACE_PREFIXES
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
        .ok_or_else(invalid)?;

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    Ok(())
}

/// Parse an allowed range as CIDR, or a bare IP as a host route
pub fn parse_route_target(value: &str) -> Result<IpNet, NetworkError> {
    let value = value.trim();
    if let Ok(net) = value.parse::<IpNet>() {
        return Ok(net);
    }
    value
        .parse::<IpAddr>()
        .map(IpNet::from)
        .map_err(|_| NetworkError::InvalidRange {
            value: value.to_string(),
        })
}

/// Dotted-decimal mask for an IPv4 prefix (e.g. /24 -> 255.255.255.0)
pub fn dotted_netmask(net: &IpNet) -> Result<String, NetworkError> {
    match net {
        IpNet::V4(v4) => Ok(v4.netmask().to_string()),
        IpNet::V6(_) => Err(NetworkError::InvalidAddress {
            value: net.to_string(),
            reason: "dotted-decimal netmask requires an IPv4 address".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_interface_names() {
        for name in ["wg0", "utun5", "tun12", "wg10"] {
            assert!(validate_interface_name(name).is_ok(), "{}", name);
        }
    }

    #[test]
    fn test_invalid_interface_names() {
        for name in [
            "",
            "wg",
            "utun",
            "eth0",
            "wg0; rm -rf /",
            "wg0 up",
            "-wg0",
            "wg-1",
            "WG0",
            "wg0\n",
            "wg0000000000000000",
        ] {
            assert!(
                matches!(
                    validate_interface_name(name),
                    Err(NetworkError::InvalidInterfaceName { .. })
                ),
                "{:?} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_route_targets() {
        assert_eq!(parse_route_target("10.0.0.0/24").unwrap().to_string(), "10.0.0.0/24");
        assert_eq!(parse_route_target(" 8.8.8.8 ").unwrap().to_string(), "8.8.8.8/32");
        assert_eq!(parse_route_target("fd00::/64").unwrap().to_string(), "fd00::/64");
    }

    #[test]
    fn test_malformed_route_targets() {
        for value in ["10.0.0.0/33", "10.0.0", "example.com", "10.0.0.0/24 dev eth0", "-net"] {
            assert!(
                matches!(parse_route_target(value), Err(NetworkError::InvalidRange { .. })),
                "{:?} should be rejected",
                value
            );
        }
    }

    #[test]
    fn test_dotted_netmask() {
        let net: IpNet = "10.9.0.2/16".parse().unwrap();
        assert_eq!(dotted_netmask(&net).unwrap(), "255.255.0.0");
        let net: IpNet = "192.168.1.7/32".parse().unwrap();
        assert_eq!(dotted_netmask(&net).unwrap(), "255.255.255.255");
        let net: IpNet = "fd00::2/64".parse().unwrap();
        assert!(dotted_netmask(&net).is_err());
    }
}
