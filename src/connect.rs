//! Connection orchestration
//!
//! Setup runs step by step in the foreground:
//! - parse the tunnel configuration
//! - fetch the forwarding rules served through it
//! - bring the tunnel device up
//! - assign the local address and install a route per allowed range
//!
//! After that a single monitor task owns the tunnel. It waits on either a
//! termination signal or a one-second tick, redrawing the traffic display when
//! counters change and tearing the tunnel down on shutdown.

use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::api::{ForwardingRule, ResourceApi};
use crate::config::PeerConfig;
use crate::error::Result;
use crate::net::{parse_route_target, HostNetworkConfigurator};
use crate::traffic::{self, TrafficDisplay, TrafficSample};
use crate::tunnel::{DeviceFactory, TunnelController, TunnelHandle};

/// Traffic polling period
const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Gateway domain for the default region
const GATEWAY_DOMAIN: &str = "portmap.io";

/// An established tunnel: device up, address assigned, routes installed
pub struct Connection {
    pub handle: TunnelHandle,
    /// Human-readable gateway (e.g. "eu.portmap.io")
    pub gateway: String,
    /// Tunnel address without prefix length
    pub local_address: String,
    pub rules: Vec<ForwardingRule>,
}

impl Connection {
    /// One line per rule, `  • https://host:443 => http://10.9.0.2:8080`
    pub fn rule_lines(&self) -> Vec<String> {
        self.rules
            .iter()
            .map(|rule| rule_summary(rule, &self.local_address))
            .collect()
    }
}

/// Sets up and supervises a single tunnel
pub struct Connector {
    api: Arc<dyn ResourceApi>,
    controller: TunnelController,
    network: Box<dyn HostNetworkConfigurator>,
}

impl Connector {
    pub fn new(
        api: Arc<dyn ResourceApi>,
        devices: Box<dyn DeviceFactory>,
        network: Box<dyn HostNetworkConfigurator>,
    ) -> Self {
        Self {
            api,
            controller: TunnelController::new(devices),
            network,
        }
    }

    /// Run every setup step. On failure nothing is left active.
    pub async fn establish(&self, config_path: &Path) -> Result<Connection> {
        let (config, resource_id) = PeerConfig::from_file(config_path)?;
        tracing::info!("Loaded tunnel configuration for resource {}", resource_id);

        let rules = self.api.list_forwarding_rules(&resource_id).await?;
        tracing::debug!("Fetched {} forwarding rules", rules.len());
        let gateway = gateway_label(rules.first().and_then(|r| r.region()));
        let local_address = config.local_address.addr().to_string();

        let mut handle = self.controller.bring_up(&config).await?;

        if let Err(e) = self.configure_host(&handle, &config).await {
            tracing::warn!("Host configuration failed, closing {}", handle.name());
            handle.close().await;
            self.network.teardown(handle.name()).await;
            return Err(e);
        }

        Ok(Connection {
            handle,
            gateway,
            local_address,
            rules,
        })
    }

    async fn configure_host(&self, handle: &TunnelHandle, config: &PeerConfig) -> Result<()> {
        let interface = handle.name();
        // Reject bad ranges before the host is touched
        for range in &config.allowed_ranges {
            parse_route_target(range)?;
        }

        self.network
            .assign_address(interface, &config.local_address)
            .await?;
        for range in &config.allowed_ranges {
            self.network
                .add_route(interface, range, &config.local_address)
                .await?;
        }
        Ok(())
    }

    /// Connect, then block until a termination signal has torn the tunnel down
    /// and the process exited. Returns only on setup failure.
    pub async fn run(self, config_path: &Path, service_mode: bool) -> Result<()> {
        let connection = self.establish(config_path).await?;

        println!(
            "\n✓ Connected to {} via {}",
            connection.gateway,
            connection.handle.name()
        );
        let lines = connection.rule_lines();
        if !service_mode {
            println!("\nPress Ctrl+C to disconnect");
            if !lines.is_empty() {
                println!("\n✓ Available mapping rules:");
                for line in &lines {
                    println!("{}", line);
                }
                println!();
            }
        }

        let display = TrafficDisplay::new(std::io::stdout(), !service_mode && !lines.is_empty());
        let network = self.network;
        let monitor = tokio::spawn(async move {
            let mut handle = connection.handle;
            monitor(&mut handle, display, shutdown_signal(), SAMPLE_INTERVAL).await;
            disconnect(&mut handle, network.as_ref(), service_mode).await;
            std::process::exit(0);
        });

        // The monitor task ends the process; getting here means it panicked
        match monitor.await {
            Ok(()) => Ok(()),
            Err(e) => Err(std::io::Error::other(format!("monitor task failed: {}", e)).into()),
        }
    }
}

/// Close the device, then remove the interface. Both steps are best effort.
pub async fn disconnect(
    handle: &mut TunnelHandle,
    network: &dyn HostNetworkConfigurator,
    service_mode: bool,
) {
    if !service_mode {
        println!("\n⚡ Disconnecting...");
    }
    handle.close().await;
    network.teardown(handle.name()).await;
}

/// Poll traffic every `period` until `shutdown` resolves. The last sample is
/// carried between iterations; nothing else touches the handle meanwhile.
pub async fn monitor<W, S>(
    handle: &mut TunnelHandle,
    mut display: TrafficDisplay<W>,
    shutdown: S,
    period: Duration,
) where
    W: Write,
    S: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    display.start();
    let mut last = TrafficSample::default();

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                if display.is_enabled() {
                    let current = traffic::sample(Some(&*handle));
                    last = display.update(last, current);
                }
            }
        }
    }
}

/// Resolves on Ctrl+C, or SIGTERM on Unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// `portmap.io` for the default region, `<region>.portmap.io` otherwise
pub fn gateway_label(region: Option<&str>) -> String {
    match region {
        Some(region) if !region.is_empty() && region != "default" => {
            format!("{}.{}", region, GATEWAY_DOMAIN)
        }
        _ => GATEWAY_DOMAIN.to_string(),
    }
}

/// HTTPS rules proxied to a plain HTTP backend show `http` on the local side
pub fn rule_summary(rule: &ForwardingRule, local_address: &str) -> String {
    let backend_protocol = if rule.protocol == "https" && rule.proxy_to_http_backend {
        "http"
    } else {
        rule.protocol.as_str()
    };
    format!(
        "  • {}://{}:{} => {}://{}:{}",
        rule.protocol,
        rule.hostname,
        rule.external_port,
        backend_protocol,
        local_address,
        rule.internal_port
    )
}
