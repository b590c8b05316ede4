//! Configuration parsing
//!
//! The tunnel definition comes from a WireGuard-style `.conf` file; API
//! settings come from the environment and command line.

mod parser;
mod settings;

pub use parser::{PeerConfig, DEFAULT_KEEPALIVE_SECONDS};
pub use settings::{load_env_file, Settings, DEFAULT_API_URL, DEFAULT_ENV_FILE};
