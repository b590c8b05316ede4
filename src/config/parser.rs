//! Tunnel configuration file parser
//!
//! Parses WireGuard-style `.conf` files with a `[portmap]` section carrying the
//! resource identifier alongside the usual `[Interface]` and `[Peer]` sections.

use std::path::Path;

use ipnet::IpNet;

use crate::error::ConfigError;

/// Keepalive used when the peer section omits it or it does not parse
pub const DEFAULT_KEEPALIVE_SECONDS: u16 = 25;

/// Single-peer tunnel definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    /// Our tunnel address with prefix (e.g. 10.9.0.2/16)
    pub local_address: IpNet,
    /// DNS server (optional, informational)
    pub local_dns: Option<String>,
    /// Our private key, base64 as written in the file
    pub private_key: String,
    /// Peer's public key, base64 as written in the file
    pub peer_public_key: String,
    /// Peer endpoint as host:port
    pub peer_endpoint: String,
    /// Allowed ranges in file order, never empty
    pub allowed_ranges: Vec<String>,
    /// Persistent keepalive interval
    pub keepalive_seconds: u16,
}

impl PeerConfig {
    /// Load a configuration file, returning the peer definition and its resource identifier
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<(Self, String), ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                ConfigError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// Parse a configuration from a string
    pub fn parse(content: &str) -> Result<(Self, String), ConfigError> {
        let mut raw = RawConfig::default();
        let mut current_section: Option<Section> = None;

        for (line_num, line) in content.lines().enumerate() {
            let line_num = line_num + 1;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                current_section = Some(Section::from_header(&line[1..line.len() - 1]));
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::ParseError {
                    line: line_num,
                    message: format!("Expected 'key = value', got: {}", line),
                });
            };

            let key = normalize_key(key);
            let value = value.trim();

            match current_section {
                Some(Section::Portmap) => match key.as_str() {
                    "configid" | "resourceid" => raw.resource_id = Some(value.to_string()),
                    _ => tracing::debug!("Unknown portmap key: {}", key),
                },
                Some(Section::Interface) => match key.as_str() {
                    "privatekey" => raw.private_key = Some(value.to_string()),
                    "address" => raw.address = Some(value.to_string()),
                    "dns" => raw.dns = Some(value.to_string()),
                    _ => tracing::debug!("Unknown interface key: {}", key),
                },
                Some(Section::Peer) => match key.as_str() {
                    "publickey" => raw.public_key = Some(value.to_string()),
                    "endpoint" => raw.endpoint = Some(value.to_string()),
                    "allowedips" => raw.allowed_ips = Some(value.to_string()),
                    "persistentkeepalive" => raw.keepalive = Some(value.to_string()),
                    _ => tracing::debug!("Unknown peer key: {}", key),
                },
                Some(Section::Other) => {}
                None => {
                    return Err(ConfigError::ParseError {
                        line: line_num,
                        message: "Configuration value outside of any section".to_string(),
                    });
                }
            }
        }

        raw.validate()
    }
}

/// Section type during parsing
#[derive(Clone, Copy)]
enum Section {
    Portmap,
    Interface,
    Peer,
    Other,
}

impl Section {
    fn from_header(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "portmap" => Section::Portmap,
            "interface" => Section::Interface,
            "peer" => Section::Peer,
            other => {
                tracing::debug!("Ignoring unknown section [{}]", other);
                Section::Other
            }
        }
    }
}

/// `PrivateKey`, `privatekey` and `private_key` all name the same field
fn normalize_key(key: &str) -> String {
    key.trim()
        .chars()
        .filter(|c| *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Values collected before validation
#[derive(Default)]
struct RawConfig {
    resource_id: Option<String>,
    private_key: Option<String>,
    address: Option<String>,
    dns: Option<String>,
    public_key: Option<String>,
    endpoint: Option<String>,
    allowed_ips: Option<String>,
    keepalive: Option<String>,
}

impl RawConfig {
    /// First violation wins
    fn validate(self) -> Result<(PeerConfig, String), ConfigError> {
        let resource_id = required(self.resource_id, "config_id in [portmap]")?;
        let private_key = required(self.private_key, "PrivateKey")?;

        let address = required(self.address, "Address")?;
        let local_address: IpNet = address
            .parse()
            .map_err(|_| ConfigError::InvalidCidr { value: address })?;

        let peer_public_key = required(self.public_key, "PublicKey in [Peer]")?;
        let peer_endpoint = required(self.endpoint, "Endpoint in [Peer]")?;

        let allowed_ranges: Vec<String> = self
            .allowed_ips
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if allowed_ranges.is_empty() {
            return Err(ConfigError::MissingField {
                field: "AllowedIPs in [Peer]".to_string(),
            });
        }

        let keepalive_seconds = self
            .keepalive
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_KEEPALIVE_SECONDS);

        let peer = PeerConfig {
            local_address,
            local_dns: self.dns.filter(|d| !d.is_empty()),
            private_key,
            peer_public_key,
            peer_endpoint,
            allowed_ranges,
            keepalive_seconds,
        };

        Ok((peer, resource_id))
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, ConfigError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingField {
            field: field.to_string(),
        })
}
