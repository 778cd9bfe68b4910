//! Centralized validation functions for ppm-agent.
//!
//! This module provides unified validation for:
//! - Source ranges (single IP or CIDR) before they reach a firewall tool
//! - Server slugs
//! - Ports and interface addresses from the command line
//!
//! Anything that ends up as an argument to `iptables` or `netsh` must pass
//! through [`validate_range`] first. The only way to obtain a [`ValidRange`]
//! is through that function, so backends taking `&ValidRange` cannot be
//! handed an unchecked string.

use ipnet::IpNet;
use std::fmt;
use std::net::IpAddr;

use crate::error::ValidationError;

/// Length of a server slug.
pub const SLUG_LEN: usize = 8;

/// A source range that parsed as an IP address or CIDR block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValidRange(IpNet);

impl ValidRange {
    pub fn net(&self) -> IpNet {
        self.0
    }
}

impl fmt::Display for ValidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Characters that can appear in a textual IPv4/IPv6 address or CIDR.
fn is_range_char(c: char) -> bool {
    c.is_ascii_hexdigit() || c == '.' || c == ':' || c == '/'
}

/// Validate a range string and return the parsed network.
///
/// A plain IP address (without /prefix) becomes a /32 (IPv4) or /128
/// (IPv6) network. The canonical form is what gets handed to the firewall
/// tool, so the same range always produces the same rule arguments.
///
/// # Examples
/// ```
/// use ppm_agent::validation::validate_range;
/// assert_eq!(validate_range("192.168.1.1").unwrap().to_string(), "192.168.1.1/32");
/// assert!(validate_range("10.0.0.0/24").is_ok());
/// assert!(validate_range("10.0.0.0/33").is_err());
/// assert!(validate_range("; rm -rf /").is_err());
/// ```
pub fn validate_range(text: &str) -> Result<ValidRange, ValidationError> {
    if text.is_empty() || !text.chars().all(is_range_char) {
        return Err(ValidationError::Range(text.to_string()));
    }

    let net = if text.contains('/') {
        text.parse::<IpNet>()
            .map_err(|_| ValidationError::Range(text.to_string()))?
    } else {
        let ip: IpAddr = text
            .parse()
            .map_err(|_| ValidationError::Range(text.to_string()))?;
        IpNet::from(ip)
    };

    Ok(ValidRange(net))
}

/// Validate an IP address string and return the parsed IpAddr.
pub fn validate_ip(ip_str: &str) -> Result<IpAddr, ValidationError> {
    ip_str
        .parse()
        .map_err(|_| ValidationError::Ip(ip_str.to_string()))
}

/// A slug is exactly 8 lowercase hexadecimal characters.
///
/// # Examples
/// ```
/// use ppm_agent::validation::is_valid_slug;
/// assert!(is_valid_slug("abcdef12"));
/// assert!(!is_valid_slug("ABCDEF12"));
/// assert!(!is_valid_slug("abcdef1"));
/// ```
pub fn is_valid_slug(slug: &str) -> bool {
    slug.len() == SLUG_LEN
        && slug
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

pub fn validate_slug(slug: &str) -> Result<(), ValidationError> {
    if !is_valid_slug(slug) {
        return Err(ValidationError::Slug(slug.to_string()));
    }
    Ok(())
}

/// Parse a TCP/UDP port. Port 0 is rejected: it cannot be filtered on.
pub fn validate_port(port_str: &str) -> Result<u16, ValidationError> {
    match port_str.parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(ValidationError::Port(port_str.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Range validation tests
    #[test]
    fn test_validate_range_v4_ip() {
        let range = validate_range("192.168.1.1").unwrap();
        assert_eq!(range.to_string(), "192.168.1.1/32");
    }

    #[test]
    fn test_validate_range_v6_ip() {
        let range = validate_range("::1").unwrap();
        assert_eq!(range.to_string(), "::1/128");
    }

    #[test]
    fn test_validate_range_cidr_v4() {
        let range = validate_range("10.0.0.0/24").unwrap();
        assert_eq!(range.to_string(), "10.0.0.0/24");
        assert_eq!(range.net().prefix_len(), 24);
    }

    #[test]
    fn test_validate_range_cidr_v6() {
        let range = validate_range("2001:db8::/32").unwrap();
        assert_eq!(range.to_string(), "2001:db8::/32");
    }

    #[test]
    fn test_validate_range_all() {
        assert!(validate_range("0.0.0.0/0").is_ok());
    }

    #[test]
    fn test_validate_range_empty() {
        assert_eq!(
            validate_range(""),
            Err(ValidationError::Range(String::new()))
        );
    }

    #[test]
    fn test_validate_range_not_an_ip() {
        assert!(validate_range("not-an-ip").is_err());
        assert!(validate_range("not.an.ip").is_err());
    }

    #[test]
    fn test_validate_range_bad_prefix() {
        assert!(validate_range("10.0.0.0/33").is_err());
        assert!(validate_range("2001:db8::/129").is_err());
        assert!(validate_range("10.0.0.0/").is_err());
        assert!(validate_range("10.0.0.0/-1").is_err());
    }

    #[test]
    fn test_validate_range_bad_octets() {
        assert!(validate_range("256.0.0.0").is_err());
        assert!(validate_range("1.2.3").is_err());
        assert!(validate_range("1.2.3.4.5").is_err());
        assert!(validate_range("1..2.3").is_err());
    }

    #[test]
    fn test_validate_range_injection_attempts() {
        assert!(validate_range("; rm -rf /").is_err());
        assert!(validate_range("10.0.0.0/24; reboot").is_err());
        assert!(validate_range("$(whoami)").is_err());
        assert!(validate_range("`id`").is_err());
        assert!(validate_range("10.0.0.1 -j ACCEPT").is_err());
        assert!(validate_range("10.0.0.1\n").is_err());
        assert!(validate_range("10.0.0.1\" dir=out").is_err());
        assert!(validate_range("-F").is_err());
    }

    #[test]
    fn test_validate_range_whitespace_rejected() {
        assert!(validate_range(" 10.0.0.1").is_err());
        assert!(validate_range("10.0.0.1 ").is_err());
    }

    #[test]
    fn test_validate_range_unicode_rejected() {
        // Full-width digits
        assert!(validate_range("１0.0.0.1").is_err());
    }

    // IP validation tests
    #[test]
    fn test_validate_ip() {
        assert!(validate_ip("10.11.12.13").is_ok());
        assert!(validate_ip("0.0.0.0").unwrap().is_unspecified());
        assert!(validate_ip("10.0.0.0/24").is_err());
        assert!(validate_ip("").is_err());
    }

    // Slug validation tests
    #[test]
    fn test_valid_slugs() {
        assert!(is_valid_slug("abcdef12"));
        assert!(is_valid_slug("00000000"));
        assert!(is_valid_slug("ffffffff"));
    }

    #[test]
    fn test_invalid_slugs() {
        assert!(!is_valid_slug(""));
        assert!(!is_valid_slug("abcdef1"));
        assert!(!is_valid_slug("abcdef123"));
        assert!(!is_valid_slug("ABCDEF12"));
        assert!(!is_valid_slug("abcdefgh"));
        assert!(!is_valid_slug("unknown9"));
        assert!(!is_valid_slug("abcd/f12"));
    }

    #[test]
    fn test_validate_slug_error() {
        assert_eq!(
            validate_slug("zz"),
            Err(ValidationError::Slug("zz".to_string()))
        );
    }

    // Port validation tests
    #[test]
    fn test_validate_port() {
        assert_eq!(validate_port("30120"), Ok(30120));
        assert_eq!(validate_port("65535"), Ok(65535));
        assert!(validate_port("0").is_err());
        assert!(validate_port("65536").is_err());
        assert!(validate_port("-1").is_err());
        assert!(validate_port("http").is_err());
        assert!(validate_port("").is_err());
    }
}
