//! netsh/route-based configuration for Windows

use std::sync::Arc;

use async_trait::async_trait;
use ipnet::IpNet;

use super::{
    address_error, args, dotted_netmask, parse_route_target, route_error, run_checked,
    run_logged, validate_interface_name, CommandRunner, HostNetworkConfigurator,
};
use crate::error::NetworkError;

pub struct WindowsConfigurator {
    runner: Arc<dyn CommandRunner>,
}

impl WindowsConfigurator {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Look up the interface index in `netsh interface ipv4 show interfaces`
    async fn interface_index(&self, interface: &str) -> Result<String, NetworkError> {
        let listing = run_checked(
            &self.runner,
            "netsh",
            &args(["interface", "ipv4", "show", "interfaces"]),
        )
        .await?;

        find_interface_index(&listing, interface).ok_or_else(|| {
            NetworkError::InterfaceIndexNotFound {
                name: interface.to_string(),
            }
        })
    }
}

/// Rows look like `Idx  Met  MTU  State  Name`, where the name may contain
/// spaces. The whole name column must match, so `wg1` never matches `wg10`.
fn find_interface_index(listing: &str, interface: &str) -> Option<String> {
    listing.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 || !fields[0].bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        (fields[4..].join(" ") == interface).then(|| fields[0].to_string())
    })
}

#[async_trait]
impl HostNetworkConfigurator for WindowsConfigurator {
    async fn assign_address(&self, interface: &str, local: &IpNet) -> Result<(), NetworkError> {
        validate_interface_name(interface)?;
        let mask = dotted_netmask(local)?;
        let ip = local.addr().to_string();

        run_checked(
            &self.runner,
            "netsh",
            &args(["interface", "ip", "set", "address", interface, "static", &ip, &mask]),
        )
        .await
        .map_err(|e| address_error(interface, e))?;

        tracing::info!("Assigned {} (mask {}) to {}", ip, mask, interface);
        Ok(())
    }

    async fn add_route(
        &self,
        interface: &str,
        range: &str,
        local: &IpNet,
    ) -> Result<(), NetworkError> {
        let target = parse_route_target(range)?;
        validate_interface_name(interface)?;
        let network = target.to_string();
        let mask = dotted_netmask(&target)?;
        let gateway = local.addr().to_string();

        let index = self
            .interface_index(interface)
            .await
            .map_err(|e| route_error(&network, e))?;

        run_checked(
            &self.runner,
            "route",
            &args([
                "add",
                &target.network().to_string(),
                "mask",
                &mask,
                &gateway,
                "metric",
                "1",
                "IF",
                &index,
            ]),
        )
        .await
        .map_err(|e| route_error(&network, e))?;

        tracing::info!("Added route: {} via {} (IF {})", network, interface, index);
        Ok(())
    }

    async fn teardown(&self, interface: &str) {
        if validate_interface_name(interface).is_err() {
            return;
        }
        run_logged(&self.runner, "netsh", &args(["interface", "delete", interface])).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingRunner;

    const LISTING: &str = "\r
Idx     Met         MTU          State                Name\r
---  ----------  ----------  ------------  ---------------------------\r
  1          75  4294967295  connected     Loopback Pseudo-Interface 1\r
 17          25        1500  connected     Ethernet 2\r
 23           5        1420  connected     wg10\r
 24           5        1420  connected     wg1\r
";

    #[test]
    fn test_find_interface_index_exact_name() {
        assert_eq!(find_interface_index(LISTING, "wg1").as_deref(), Some("24"));
        assert_eq!(find_interface_index(LISTING, "wg10").as_deref(), Some("23"));
        assert_eq!(find_interface_index(LISTING, "Ethernet 2").as_deref(), Some("17"));
        assert_eq!(find_interface_index(LISTING, "wg0"), None);
    }

    #[tokio::test]
    async fn test_add_route_uses_index_and_gateway() {
        let runner = RecordingRunner::new().respond_to("netsh interface ipv4 show interfaces", LISTING);
        let net = WindowsConfigurator::new(Arc::new(runner.clone()));
        let local: IpNet = "10.9.0.2/16".parse().unwrap();

        net.add_route("wg1", "192.168.50.0/24", &local).await.unwrap();
        assert_eq!(
            runner.calls(),
            vec![
                "netsh interface ipv4 show interfaces",
                "route add 192.168.50.0 mask 255.255.255.0 10.9.0.2 metric 1 IF 24"
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_index_is_route_error() {
        let runner = RecordingRunner::new().respond_to("netsh interface ipv4 show interfaces", LISTING);
        let net = WindowsConfigurator::new(Arc::new(runner.clone()));
        let local: IpNet = "10.9.0.2/16".parse().unwrap();

        let err = net.add_route("wg0", "10.0.0.0/24", &local).await.unwrap_err();
        assert!(matches!(err, NetworkError::InterfaceIndexNotFound { .. }));
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_assign_address_static() {
        let runner = RecordingRunner::new();
        let net = WindowsConfigurator::new(Arc::new(runner.clone()));
        net.assign_address("wg0", &"10.9.0.2/16".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(
            runner.calls(),
            vec!["netsh interface ip set address wg0 static 10.9.0.2 255.255.0.0"]
        );
    }

    #[tokio::test]
    async fn test_bad_interface_spawns_nothing() {
        let runner = RecordingRunner::new().respond_to("netsh interface ipv4 show interfaces", LISTING);
        let net = WindowsConfigurator::new(Arc::new(runner.clone()));
        let local: IpNet = "10.9.0.2/16".parse().unwrap();

        assert!(matches!(
            net.assign_address("Ethernet 2", &local).await,
            Err(NetworkError::InvalidInterfaceName { .. })
        ));
        assert!(matches!(
            net.add_route("wg0\" & del", "10.0.0.0/24", &local).await,
            Err(NetworkError::InvalidInterfaceName { .. })
        ));
        net.teardown("Loopback Pseudo-Interface 1").await;
        assert!(runner.calls().is_empty());
    }
}
