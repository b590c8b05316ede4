//! iproute2-based configuration

use std::sync::Arc;

use async_trait::async_trait;
use ipnet::IpNet;

use super::{
    address_error, args, parse_route_target, route_error, run_checked, run_logged,
    validate_interface_name, CommandRunner, HostNetworkConfigurator,
};
use crate::error::NetworkError;

pub struct LinuxConfigurator {
    runner: Arc<dyn CommandRunner>,
}

impl LinuxConfigurator {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl HostNetworkConfigurator for LinuxConfigurator {
    async fn assign_address(&self, interface: &str, local: &IpNet) -> Result<(), NetworkError> {
        validate_interface_name(interface)?;

        run_checked(&self.runner, "ip", &args(["link", "set", interface, "up"]))
            .await
            .map_err(|e| address_error(interface, e))?;

        let cidr = local.to_string();
        run_checked(&self.runner, "ip", &args(["addr", "add", "dev", interface, &cidr]))
            .await
            .map_err(|e| address_error(interface, e))?;

        tracing::info!("Assigned {} to {}", cidr, interface);
        Ok(())
    }

    async fn add_route(
        &self,
        interface: &str,
        range: &str,
        _local: &IpNet,
    ) -> Result<(), NetworkError> {
        let network = parse_route_target(range)?.to_string();
        validate_interface_name(interface)?;

        run_checked(&self.runner, "ip", &args(["route", "add", &network, "dev", interface]))
            .await
            .map_err(|e| route_error(&network, e))?;

        tracing::info!("Added route: {} via {}", network, interface);
        Ok(())
    }

    async fn teardown(&self, interface: &str) {
        if validate_interface_name(interface).is_err() {
            return;
        }
        run_logged(&self.runner, "ip", &args(["link", "del", interface])).await;
    }
}
