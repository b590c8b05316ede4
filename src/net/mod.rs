//! Host network configuration
//!
//! Assigns the tunnel's local address and installs routes for its allowed
//! ranges using the platform's own tools (`ip`, `ifconfig`/`route`, `netsh`).
//! One [`HostNetworkConfigurator`] per platform family, chosen once at startup.

mod command;
mod linux;
mod macos;
mod validation;
mod windows;

use std::sync::Arc;

use async_trait::async_trait;
use ipnet::IpNet;

use crate::error::NetworkError;

pub use command::{display_command, CommandOutput, CommandRunner, SystemCommandRunner};
pub use linux::LinuxConfigurator;
pub use macos::MacosConfigurator;
pub use validation::{dotted_netmask, parse_route_target, validate_interface_name};
pub use windows::WindowsConfigurator;

#[async_trait]
pub trait HostNetworkConfigurator: Send + Sync {
    /// Give `interface` its local address (CIDR form, e.g. 10.9.0.2/16)
    async fn assign_address(&self, interface: &str, local: &IpNet) -> Result<(), NetworkError>;

    /// Route `range` through `interface`; `local` is the interface's own address
    async fn add_route(&self, interface: &str, range: &str, local: &IpNet)
        -> Result<(), NetworkError>;

    /// Best-effort removal of the interface; failures are only logged
    async fn teardown(&self, interface: &str);
}

/// Configurator for the platform this binary was built for
pub fn for_current_platform(runner: Arc<dyn CommandRunner>) -> Box<dyn HostNetworkConfigurator> {
    #[cfg(target_os = "macos")]
    return Box::new(MacosConfigurator::new(runner));

    #[cfg(target_os = "windows")]
    return Box::new(WindowsConfigurator::new(runner));

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    return Box::new(LinuxConfigurator::new(runner));
}

/// Run a command, turning a spawn failure or non-zero exit into `CommandFailed`
/// carrying the combined output
async fn run_checked(
    runner: &Arc<dyn CommandRunner>,
    program: &str,
    args: &[String],
) -> Result<String, NetworkError> {
    let command = display_command(program, args);
    let output = runner
        .run(program, args)
        .await
        .map_err(|e| NetworkError::CommandFailed {
            command: command.clone(),
            output: e.to_string(),
        })?;

    if !output.success {
        let status = output
            .code
            .map(|c| format!("exit status {}", c))
            .unwrap_or_else(|| "terminated by signal".to_string());
        return Err(NetworkError::CommandFailed {
            command,
            output: format!("{}: {}", status, output.output.trim()),
        });
    }
    Ok(output.output)
}

/// Teardown helper: run and log, never fail
async fn run_logged(runner: &Arc<dyn CommandRunner>, program: &str, args: &[String]) {
    if let Err(e) = run_checked(runner, program, args).await {
        tracing::debug!("Ignoring teardown failure: {}", e);
    }
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn address_error(interface: &str, e: NetworkError) -> NetworkError {
    match e {
        NetworkError::CommandFailed { .. } => NetworkError::AddressAssignFailed {
            interface: interface.to_string(),
            reason: e.to_string(),
        },
        other => other,
    }
}

fn route_error(network: &str, e: NetworkError) -> NetworkError {
    match e {
        NetworkError::CommandFailed { .. } => NetworkError::RouteSetupFailed {
            network: network.to_string(),
            reason: e.to_string(),
        },
        other => other,
    }
}
