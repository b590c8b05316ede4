//! portmap - WireGuard connect client for portmap.io
//!
//! Brings up a WireGuard tunnel to a portmap.io gateway so that forwarded
//! hostnames and ports reach services on this machine.
//!
//! # Features
//!
//! - WireGuard-style configuration files with a `[portmap]` section
//! - Userspace tunnel device (tun-rs + boringtun) on macOS, Linux and Windows
//! - Address and route setup with the platform's own network tools
//! - Live traffic counters while connected
//!
//! # Usage
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use portmap::api::HttpResourceApi;
//! use portmap::net::{self, SystemCommandRunner};
//! use portmap::tunnel::UserspaceDeviceFactory;
//! use portmap::Connector;
//!
//! #[tokio::main]
//! async fn main() -> portmap::Result<()> {
//!     let api = HttpResourceApi::new(portmap::config::DEFAULT_API_URL, "token")?;
//!     let connector = Connector::new(
//!         Arc::new(api),
//!         Box::new(UserspaceDeviceFactory),
//!         net::for_current_platform(Arc::new(SystemCommandRunner)),
//!     );
//!     connector.run(Path::new("portmap.conf"), false).await
//! }
//! ```

pub mod api;
pub mod config;
pub mod connect;
pub mod error;
pub mod net;
pub mod traffic;
pub mod tunnel;

#[cfg(test)]
mod testing;

pub use config::{PeerConfig, Settings};
pub use connect::{Connection, Connector};
pub use error::{PortmapError, Result};
