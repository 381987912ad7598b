//! Device descriptor parsing
//!
//! A stream is created with a free-form device string of `key=value`
//! tokens, order-independent, e.g. `"ppid=5;iface=eth0;ip=10.0.0.8;port=6000"`.
//! Parsing is total: every recognized key must carry a well-formed, in-range
//! value, and unknown keys are rejected outright. Absent keys parse to
//! "not set"; each transport binding then demands its required fields, so a
//! stream is never created from a partially valid descriptor.

use std::net::Ipv4Addr;
use thiserror::Error;

/// Errors from device string parsing and required-field lookup
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("Empty device string")]
    Empty,

    #[error("Malformed token: '{0}' (expected key=value)")]
    MalformedToken(String),

    #[error("Unknown key: '{0}'")]
    UnknownKey(String),

    #[error("Duplicate key: '{0}'")]
    DuplicateKey(String),

    #[error("Invalid value for '{key}': '{value}'")]
    InvalidValue { key: &'static str, value: String },

    #[error("Value for '{key}' out of range {min}..={max}: {value}")]
    OutOfRange {
        key: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("Required field missing: '{0}'")]
    MissingField(&'static str),
}

/// Typed fields extracted from a device string
///
/// All fields are optional at the parse level; required-ness is a property
/// of the transport binding, enforced through the `require_*` accessors.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceDescriptor {
    /// Endpoint (headset) identity, 1-99
    pub ppid: Option<u8>,
    /// Bus message identifier, 1-65535
    pub msg: Option<u16>,
    /// Network interface name (e.g. for multicast sends)
    pub iface: Option<String>,
    /// Remote IPv4 address
    pub ip: Option<Ipv4Addr>,
    /// UDP port, 1-65535
    pub port: Option<u16>,
}

impl DeviceDescriptor {
    /// Parse a device string into typed fields.
    ///
    /// Tokens are separated by `;` or whitespace. Deterministic: the same
    /// string always yields the same descriptor.
    pub fn parse(device: &str) -> Result<Self, ParseError> {
        let tokens: Vec<&str> = device
            .split(|c: char| c == ';' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .collect();

        if tokens.is_empty() {
            return Err(ParseError::Empty);
        }

        let mut desc = DeviceDescriptor::default();

        for token in tokens {
            let (key, value) = token
                .split_once('=')
                .ok_or_else(|| ParseError::MalformedToken(token.to_string()))?;

            match key {
                "ppid" => {
                    if desc.ppid.is_some() {
                        return Err(ParseError::DuplicateKey(key.to_string()));
                    }
                    desc.ppid = Some(parse_ranged("ppid", value, 1, 99)? as u8);
                }
                "msg" => {
                    if desc.msg.is_some() {
                        return Err(ParseError::DuplicateKey(key.to_string()));
                    }
                    desc.msg = Some(parse_ranged("msg", value, 1, 65_535)? as u16);
                }
                "iface" => {
                    if desc.iface.is_some() {
                        return Err(ParseError::DuplicateKey(key.to_string()));
                    }
                    if value.is_empty()
                        || !value
                            .chars()
                            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
                    {
                        return Err(ParseError::InvalidValue {
                            key: "iface",
                            value: value.to_string(),
                        });
                    }
                    desc.iface = Some(value.to_string());
                }
                "ip" => {
                    if desc.ip.is_some() {
                        return Err(ParseError::DuplicateKey(key.to_string()));
                    }
                    desc.ip = Some(value.parse::<Ipv4Addr>().map_err(|_| {
                        ParseError::InvalidValue {
                            key: "ip",
                            value: value.to_string(),
                        }
                    })?);
                }
                "port" => {
                    if desc.port.is_some() {
                        return Err(ParseError::DuplicateKey(key.to_string()));
                    }
                    desc.port = Some(parse_ranged("port", value, 1, 65_535)? as u16);
                }
                _ => return Err(ParseError::UnknownKey(key.to_string())),
            }
        }

        Ok(desc)
    }

    pub fn require_ppid(&self) -> Result<u8, ParseError> {
        self.ppid.ok_or(ParseError::MissingField("ppid"))
    }

    pub fn require_port(&self) -> Result<u16, ParseError> {
        self.port.ok_or(ParseError::MissingField("port"))
    }

    pub fn require_ip(&self) -> Result<Ipv4Addr, ParseError> {
        self.ip.ok_or(ParseError::MissingField("ip"))
    }
}

fn parse_ranged(key: &'static str, value: &str, min: u32, max: u32) -> Result<u32, ParseError> {
    let n: u32 = value.parse().map_err(|_| ParseError::InvalidValue {
        key,
        value: value.to_string(),
    })?;

    if n < min || n > max {
        return Err(ParseError::OutOfRange {
            key,
            value: n,
            min,
            max,
        });
    }

    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ppid_and_port() {
        let d = DeviceDescriptor::parse("ppid=5;port=6000").unwrap();
        assert_eq!(d.ppid, Some(5));
        assert_eq!(d.port, Some(6000));
        assert_eq!(d.msg, None);
        assert_eq!(d.iface, None);
        assert_eq!(d.ip, None);
    }

    #[test]
    fn test_full_descriptor_order_independent() {
        let a = DeviceDescriptor::parse("ppid=7;iface=eth0;ip=10.1.2.3;port=5004;msg=400");
        let b = DeviceDescriptor::parse("msg=400 port=5004 ip=10.1.2.3 iface=eth0 ppid=7");
        assert_eq!(a.unwrap(), b.unwrap());
    }

    #[test]
    fn test_ppid_range() {
        assert!(matches!(
            DeviceDescriptor::parse("ppid=0"),
            Err(ParseError::OutOfRange { key: "ppid", .. })
        ));
        assert!(matches!(
            DeviceDescriptor::parse("ppid=100"),
            Err(ParseError::OutOfRange { key: "ppid", .. })
        ));
        assert!(DeviceDescriptor::parse("ppid=1").is_ok());
        assert!(DeviceDescriptor::parse("ppid=99").is_ok());
    }

    #[test]
    fn test_port_range() {
        assert!(matches!(
            DeviceDescriptor::parse("port=70000"),
            Err(ParseError::OutOfRange { key: "port", .. })
        ));
        assert!(matches!(
            DeviceDescriptor::parse("port=0"),
            Err(ParseError::OutOfRange { key: "port", .. })
        ));
    }

    #[test]
    fn test_bad_values() {
        assert!(matches!(
            DeviceDescriptor::parse("ppid=abc"),
            Err(ParseError::InvalidValue { key: "ppid", .. })
        ));
        assert!(matches!(
            DeviceDescriptor::parse("ip=300.1.2.3"),
            Err(ParseError::InvalidValue { key: "ip", .. })
        ));
        assert!(matches!(
            DeviceDescriptor::parse("iface=bad/name"),
            Err(ParseError::InvalidValue { key: "iface", .. })
        ));
    }

    #[test]
    fn test_rejects_unknown_and_malformed() {
        assert_eq!(
            DeviceDescriptor::parse("bogus=1"),
            Err(ParseError::UnknownKey("bogus".to_string()))
        );
        assert_eq!(
            DeviceDescriptor::parse("ppid"),
            Err(ParseError::MalformedToken("ppid".to_string()))
        );
        assert_eq!(DeviceDescriptor::parse("  ;; "), Err(ParseError::Empty));
        assert_eq!(
            DeviceDescriptor::parse("ppid=5;ppid=6"),
            Err(ParseError::DuplicateKey("ppid".to_string()))
        );
    }

    #[test]
    fn test_required_fields() {
        let d = DeviceDescriptor::parse("ppid=5").unwrap();
        assert_eq!(d.require_ppid(), Ok(5));
        assert_eq!(d.require_port(), Err(ParseError::MissingField("port")));
        assert_eq!(d.require_ip(), Err(ParseError::MissingField("ip")));
    }

    proptest! {
        /// Parsing is deterministic: re-parsing yields identical fields.
        #[test]
        fn prop_parse_deterministic(ppid in 1u8..=99, port in 1u16..=65535) {
            let s = format!("ppid={};port={}", ppid, port);
            let a = DeviceDescriptor::parse(&s).unwrap();
            let b = DeviceDescriptor::parse(&s).unwrap();
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a.ppid, Some(ppid));
            prop_assert_eq!(a.port, Some(port));
        }
    }
}
