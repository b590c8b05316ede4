//! Error types for the portmap connect client

use thiserror::Error;

/// Main error type for portmap
#[derive(Error, Debug)]
pub enum PortmapError {
    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Tunnel device errors
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    /// Host address/route errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Resource API errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// System I/O errors
    #[error("System error: {0}")]
    System(#[from] std::io::Error),
}

/// Configuration parsing errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid config format at line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid CIDR notation: {value}")]
    InvalidCidr { value: String },

    #[error("Missing setting: {name}")]
    MissingSetting { name: String },

    #[error("Failed to load env file {path}: {reason}")]
    EnvFile { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tunnel device errors
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Failed to create TUN device: {reason}")]
    CreateFailed { reason: String },

    #[error("Insufficient privileges: {message}")]
    InsufficientPrivileges { message: String },

    #[error("Invalid base64 key: {field}")]
    InvalidKey { field: String },

    #[error("Failed to configure device: {reason}")]
    ConfigureFailed { reason: String },

    #[error("Failed to activate device: {reason}")]
    ActivationFailed { reason: String },

    #[error("Device status unavailable: {reason}")]
    StatusUnavailable { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Host network configuration errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Invalid interface name: {name}")]
    InvalidInterfaceName { name: String },

    #[error("Invalid IP address or CIDR: {value}")]
    InvalidRange { value: String },

    #[error("Invalid interface address {value}: {reason}")]
    InvalidAddress { value: String, reason: String },

    #[error("Failed to set IP address on {interface}: {reason}")]
    AddressAssignFailed { interface: String, reason: String },

    #[error("Failed to add route {network}: {reason}")]
    RouteSetupFailed { network: String, reason: String },

    #[error("Could not find interface index for {name}")]
    InterfaceIndexNotFound { name: String },

    #[error("`{command}` failed: {output}")]
    CommandFailed { command: String, output: String },
}

/// Resource API errors
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// Transport failures and server-side errors are worth another attempt
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(e) => e.is_connect() || e.is_timeout(),
            Self::Status { status, .. } => *status >= 500,
            Self::Decode(_) => false,
        }
    }
}

impl PortmapError {
    /// Get a user-friendly error message with suggested action
    pub fn user_message(&self) -> String {
        match self {
            Self::Tunnel(TunnelError::InsufficientPrivileges { .. }) => {
                #[cfg(target_os = "linux")]
                return "Insufficient privileges. Run with sudo or grant CAP_NET_ADMIN:\n  \
                        sudo setcap cap_net_admin=eip ./portmap"
                    .to_string();
                #[cfg(target_os = "macos")]
                return "Insufficient privileges. Run with sudo:\n  \
                        sudo portmap connect config.conf"
                    .to_string();
                #[cfg(target_os = "windows")]
                return "Insufficient privileges. Run as Administrator.".to_string();
                #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
                return format!("{}", self);
            }

            Self::Config(ConfigError::FileNotFound { path }) => {
                format!(
                    "Config file not found: {}\n  Check the path and try again.",
                    path
                )
            }

            Self::Config(ConfigError::MissingSetting { name }) => {
                format!(
                    "{} is not set.\n  Pass --token, export PORTMAP_TOKEN or add it to .env.",
                    name
                )
            }

            Self::Tunnel(TunnelError::InvalidKey { field }) => {
                format!(
                    "Invalid {} in config. Expected 32-byte base64-encoded key.",
                    field
                )
            }

            Self::Api(ApiError::Status { status: 401, .. }) => {
                "The API rejected the token. Check PORTMAP_TOKEN.".to_string()
            }

            _ => format!("{}", self),
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 1,
            Self::Tunnel(TunnelError::InsufficientPrivileges { .. }) => 2,
            Self::Network(_) => 3,
            Self::Api(_) => 4,
            Self::Tunnel(_) => 6,
            Self::System(_) => 7,
        }
    }
}

/// Result type alias for portmap operations
pub type Result<T> = std::result::Result<T, PortmapError>;
