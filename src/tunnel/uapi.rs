//! Control-plane text protocol
//!
//! Newline-separated `key=value` blocks, the same shape the cross-platform
//! WireGuard implementations use for `set`/`get` operations. Keys are hex
//! encoded, everything else is plain text.

use std::fmt::Write as _;

/// Peer settings carried by a configuration block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSettings {
    pub private_key: [u8; 32],
    pub public_key: [u8; 32],
    pub endpoint: String,
    pub allowed_ip: String,
    pub persistent_keepalive_interval: u16,
}

impl PeerSettings {
    /// Render the configuration block
    pub fn to_config_text(&self) -> String {
        format!(
            "private_key={}\npublic_key={}\nendpoint={}\nallowed_ip={}\npersistent_keepalive_interval={}\n",
            hex::encode(self.private_key),
            hex::encode(self.public_key),
            self.endpoint,
            self.allowed_ip,
            self.persistent_keepalive_interval,
        )
    }

    /// Parse a configuration block; every key is required once
    pub fn from_config_text(text: &str) -> Result<Self, String> {
        let mut private_key = None;
        let mut public_key = None;
        let mut endpoint = None;
        let mut allowed_ip = None;
        let mut keepalive = None;

        for (key, value) in pairs(text)? {
            match key {
                "private_key" => private_key = Some(decode_hex_key(key, value)?),
                "public_key" => public_key = Some(decode_hex_key(key, value)?),
                "endpoint" => endpoint = Some(value.to_string()),
                "allowed_ip" => allowed_ip = Some(value.to_string()),
                "persistent_keepalive_interval" => {
                    keepalive = Some(
                        value
                            .parse()
                            .map_err(|_| format!("invalid persistent_keepalive_interval: {}", value))?,
                    )
                }
                other => return Err(format!("unsupported key: {}", other)),
            }
        }

        Ok(Self {
            private_key: private_key.ok_or("missing private_key")?,
            public_key: public_key.ok_or("missing public_key")?,
            endpoint: endpoint.ok_or("missing endpoint")?,
            allowed_ip: allowed_ip.ok_or("missing allowed_ip")?,
            persistent_keepalive_interval: keepalive.unwrap_or(0),
        })
    }
}

/// Fields of a status block this client produces
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceStatus {
    pub private_key: Option<[u8; 32]>,
    pub listen_port: Option<u16>,
    pub public_key: Option<[u8; 32]>,
    pub endpoint: Option<String>,
    pub persistent_keepalive_interval: Option<u16>,
    pub allowed_ip: Option<String>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub last_handshake_time_sec: Option<u64>,
}

impl DeviceStatus {
    /// Render the status block, interface keys first then the peer record
    pub fn to_status_text(&self) -> String {
        let mut out = String::new();
        if let Some(key) = &self.private_key {
            let _ = writeln!(out, "private_key={}", hex::encode(key));
        }
        if let Some(port) = self.listen_port {
            let _ = writeln!(out, "listen_port={}", port);
        }
        if let Some(key) = &self.public_key {
            let _ = writeln!(out, "public_key={}", hex::encode(key));
        }
        if let Some(endpoint) = &self.endpoint {
            let _ = writeln!(out, "endpoint={}", endpoint);
        }
        if let Some(secs) = self.persistent_keepalive_interval {
            let _ = writeln!(out, "persistent_keepalive_interval={}", secs);
        }
        if let Some(allowed) = &self.allowed_ip {
            let _ = writeln!(out, "allowed_ip={}", allowed);
        }
        let _ = writeln!(out, "rx_bytes={}", self.rx_bytes);
        let _ = writeln!(out, "tx_bytes={}", self.tx_bytes);
        if let Some(secs) = self.last_handshake_time_sec {
            let _ = writeln!(out, "last_handshake_time_sec={}", secs);
        }
        out
    }
}

/// Extract `rx_bytes`/`tx_bytes` from a status block.
///
/// Unknown keys are skipped; a counter that is absent or not a u64 reads as 0.
pub fn parse_counters(text: &str) -> (u64, u64) {
    let mut rx = 0;
    let mut tx = 0;
    for line in text.lines() {
        if let Some(value) = line.strip_prefix("rx_bytes=") {
            rx = value.trim().parse().unwrap_or(0);
        } else if let Some(value) = line.strip_prefix("tx_bytes=") {
            tx = value.trim().parse().unwrap_or(0);
        }
    }
    (rx, tx)
}

fn pairs(text: &str) -> Result<Vec<(&str, &str)>, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.split_once('=')
                .ok_or_else(|| format!("malformed line: {}", line))
        })
        .collect()
}

fn decode_hex_key(field: &str, value: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(value).map_err(|_| format!("{} is not hex", field))?;
    bytes
        .try_into()
        .map_err(|_| format!("{} must be 32 bytes", field))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> PeerSettings {
        PeerSettings {
            private_key: [0u8; 32],
            public_key: [0xab; 32],
            endpoint: "203.0.113.7:51820".to_string(),
            allowed_ip: "10.0.0.0/24".to_string(),
            persistent_keepalive_interval: 25,
        }
    }

    #[test]
    fn test_config_text_layout() {
        let text = settings().to_config_text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], format!("private_key={}", "0".repeat(64)));
        assert_eq!(lines[1], format!("public_key={}", "ab".repeat(32)));
        assert_eq!(lines[2], "endpoint=203.0.113.7:51820");
        assert_eq!(lines[3], "allowed_ip=10.0.0.0/24");
        assert_eq!(lines[4], "persistent_keepalive_interval=25");
    }

    #[test]
    fn test_parse_config_text() {
        let parsed = PeerSettings::from_config_text(&settings().to_config_text()).unwrap();
        assert_eq!(parsed, settings());
    }

    #[test]
    fn test_parse_rejects_unknown_key_and_short_key() {
        let unknown = format!("{}preshared_key=00\n", settings().to_config_text());
        assert!(PeerSettings::from_config_text(&unknown)
            .unwrap_err()
            .contains("unsupported"));

        let short = settings()
            .to_config_text()
            .replace(&"0".repeat(64), "0000");
        assert!(PeerSettings::from_config_text(&short)
            .unwrap_err()
            .contains("32 bytes"));
    }

    #[test]
    fn test_parse_counters() {
        let text = "private_key=00\nlisten_port=40000\nrx_bytes=1536\ntx_bytes=92\nlast_handshake_time_sec=3\n";
        assert_eq!(parse_counters(text), (1536, 92));
    }

    #[test]
    fn test_parse_counters_garbage_is_zero() {
        assert_eq!(parse_counters("rx_bytes=lots\ntx_bytes=-1\n"), (0, 0));
        assert_eq!(parse_counters(""), (0, 0));
    }

    #[test]
    fn test_status_text_contains_counters() {
        let status = DeviceStatus {
            listen_port: Some(40000),
            rx_bytes: 10,
            tx_bytes: 20,
            ..Default::default()
        };
        let text = status.to_status_text();
        assert!(text.contains("listen_port=40000\n"));
        assert_eq!(parse_counters(&text), (10, 20));
    }
}
