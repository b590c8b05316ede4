//! ifconfig/route-based configuration for macOS utun interfaces

use std::sync::Arc;

use async_trait::async_trait;
use ipnet::IpNet;

use super::{
    address_error, args, dotted_netmask, parse_route_target, route_error, run_checked,
    run_logged, validate_interface_name, CommandRunner, HostNetworkConfigurator,
};
use crate::error::NetworkError;

pub struct MacosConfigurator {
    runner: Arc<dyn CommandRunner>,
}

impl MacosConfigurator {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl HostNetworkConfigurator for MacosConfigurator {
    async fn assign_address(&self, interface: &str, local: &IpNet) -> Result<(), NetworkError> {
        validate_interface_name(interface)?;
        let mask = dotted_netmask(local)?;
        let ip = local.addr().to_string();

        // utun is point-to-point: the peer address is our own
        run_checked(
            &self.runner,
            "ifconfig",
            &args([interface, "inet", &ip, &ip, "netmask", &mask]),
        )
        .await
        .map_err(|e| address_error(interface, e))?;

        tracing::info!("Assigned {} (netmask {}) to {}", ip, mask, interface);
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

        run_checked(
            &self.runner,
            "route",
            &args(["add", "-net", &network, "-interface", interface]),
        )
        .await
        .map_err(|e| route_error(&network, e))?;

        tracing::info!("Added route: {} via {}", network, interface);
        Ok(())
    }

    async fn teardown(&self, interface: &str) {
        if validate_interface_name(interface).is_err() {
            return;
        }
        run_logged(&self.runner, "ifconfig", &args([interface, "down"])).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingRunner;

    #[tokio::test]
    async fn test_assign_address_point_to_point() {
        let runner = RecordingRunner::new();
        let net = MacosConfigurator::new(Arc::new(runner.clone()));
        net.assign_address("utun5", &"10.9.0.2/16".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(
            runner.calls(),
            vec!["ifconfig utun5 inet 10.9.0.2 10.9.0.2 netmask 255.255.0.0"]
        );
    }

    #[tokio::test]
    async fn test_ipv6_local_address_rejected_before_spawn() {
        let runner = RecordingRunner::new();
        let net = MacosConfigurator::new(Arc::new(runner.clone()));
        assert!(net
            .assign_address("utun5", &"fd00::2/64".parse().unwrap())
            .await
            .is_err());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_add_route_and_teardown() {
        let runner = RecordingRunner::new();
        let net = MacosConfigurator::new(Arc::new(runner.clone()));
        let local: IpNet = "10.9.0.2/16".parse().unwrap();
        net.add_route("utun5", "192.168.50.0/24", &local).await.unwrap();
        net.teardown("utun5").await;
        assert_eq!(
            runner.calls(),
            vec![
                "route add -net 192.168.50.0/24 -interface utun5",
                "ifconfig utun5 down"
            ]
        );
    }

    #[tokio::test]
    async fn test_bad_interface_spawns_nothing() {
        let runner = RecordingRunner::new();
        let net = MacosConfigurator::new(Arc::new(runner.clone()));
        let local: IpNet = "10.9.0.2/16".parse().unwrap();

        assert!(matches!(
            net.assign_address("en0", &local).await,
            Err(NetworkError::InvalidInterfaceName { .. })
        ));
        assert!(matches!(
            net.add_route("utun5 -ifscope en0", "10.0.0.0/24", &local).await,
            Err(NetworkError::InvalidInterfaceName { .. })
        ));
        net.teardown("lo0").await;
        assert!(runner.calls().is_empty());
    }
}
