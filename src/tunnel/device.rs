//! Tunnel device lifecycle
//!
//! A device goes `Uninitialized -> DeviceCreated -> KeysApplied -> Active -> Closed`.
//! Any failure before `Active` moves it to `Failed`, and the controller closes
//! whatever had been created before handing the error back.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::config::PeerConfig;
use crate::error::TunnelError;
use crate::tunnel::uapi::PeerSettings;

/// Control-plane view of a tunnel device implementation
#[async_trait]
pub trait TunnelDevice: Send {
    /// Apply a configuration block
    async fn configure(&mut self, config: &str) -> Result<(), TunnelError>;

    /// Start moving packets
    async fn up(&mut self) -> Result<(), TunnelError>;

    /// Current status block
    fn status(&self) -> Result<String, TunnelError>;

    /// Stop the device and release the interface
    async fn close(&mut self) -> Result<(), TunnelError>;
}

/// Allocates tunnel devices
pub trait DeviceFactory: Send + Sync {
    /// Create a device, returning it with the interface name the OS assigned
    fn create(&self) -> Result<(Box<dyn TunnelDevice>, String), TunnelError>;
}

/// Lifecycle state of a [`TunnelHandle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Uninitialized,
    DeviceCreated,
    KeysApplied,
    Active,
    Closed,
    Failed,
}

/// The live tunnel device and its interface name
pub struct TunnelHandle {
    device: Option<Box<dyn TunnelDevice>>,
    name: String,
    state: DeviceState,
}

impl TunnelHandle {
    fn new(device: Box<dyn TunnelDevice>, name: String) -> Self {
        Self {
            device: Some(device),
            name,
            state: DeviceState::DeviceCreated,
        }
    }

    /// Interface name (e.g. "wg0", "utun5")
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Query the device's status block
    pub fn status(&self) -> Result<String, TunnelError> {
        match &self.device {
            Some(device) => device.status(),
            None => Err(TunnelError::StatusUnavailable {
                reason: "device closed".to_string(),
            }),
        }
    }

    /// Close the device. Errors are logged, never raised; later calls do nothing.
    pub async fn close(&mut self) {
        let Some(mut device) = self.device.take() else {
            tracing::debug!("Tunnel {} already closed", self.name);
            return;
        };

        if let Err(e) = device.close().await {
            tracing::warn!("Failed to close tunnel {}: {}", self.name, e);
        } else {
            tracing::info!("Closed tunnel {}", self.name);
        }
        self.state = DeviceState::Closed;
    }

    fn device_mut(&mut self) -> Result<&mut Box<dyn TunnelDevice>, TunnelError> {
        self.device.as_mut().ok_or_else(|| TunnelError::ConfigureFailed {
            reason: "device closed".to_string(),
        })
    }

    fn require(&self, expected: DeviceState) -> Result<(), TunnelError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(TunnelError::ConfigureFailed {
                reason: format!("device is {:?}, expected {:?}", self.state, expected),
            })
        }
    }
}

/// Drives a device through creation, configuration and activation
pub struct TunnelController {
    factory: Box<dyn DeviceFactory>,
}

impl TunnelController {
    pub fn new(factory: Box<dyn DeviceFactory>) -> Self {
        Self { factory }
    }

    /// Allocate a device. Not retried: failure here is usually a privilege problem.
    pub fn create_device(&self) -> Result<TunnelHandle, TunnelError> {
        let (device, name) = self.factory.create()?;
        tracing::info!("Created tunnel device {}", name);
        Ok(TunnelHandle::new(device, name))
    }

    /// Convert the keys and push the configuration block to the device
    pub async fn apply_peer_config(
        &self,
        handle: &mut TunnelHandle,
        config: &PeerConfig,
    ) -> Result<(), TunnelError> {
        handle.require(DeviceState::DeviceCreated)?;

        let result = async {
            let settings = peer_settings(config)?;
            let text = settings.to_config_text();
            tracing::debug!(
                "Configuring {} for peer {} (allowed_ip={})",
                handle.name,
                settings.endpoint,
                settings.allowed_ip
            );
            handle.device_mut()?.configure(&text).await
        }
        .await;

        handle.state = match result {
            Ok(()) => DeviceState::KeysApplied,
            Err(_) => DeviceState::Failed,
        };
        result
    }

    /// Bring the configured device into the running state
    pub async fn activate(&self, handle: &mut TunnelHandle) -> Result<(), TunnelError> {
        handle.require(DeviceState::KeysApplied)?;

        match handle.device_mut()?.up().await {
            Ok(()) => {
                handle.state = DeviceState::Active;
                tracing::info!("Tunnel {} is up", handle.name);
                Ok(())
            }
            Err(e) => {
                handle.state = DeviceState::Failed;
                Err(match e {
                    TunnelError::ActivationFailed { .. } => e,
                    other => TunnelError::ActivationFailed {
                        reason: other.to_string(),
                    },
                })
            }
        }
    }

    /// Create, configure and activate; nothing is left open on failure
    pub async fn bring_up(&self, config: &PeerConfig) -> Result<TunnelHandle, TunnelError> {
        let mut handle = self.create_device()?;

        let result = match self.apply_peer_config(&mut handle, config).await {
            Ok(()) => self.activate(&mut handle).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => Ok(handle),
            Err(e) => {
                handle.close().await;
                Err(e)
            }
        }
    }
}

/// Build the control-plane peer record. Only the first allowed range is
/// installed; the others are routed by the host but not accepted by the peer filter.
pub fn peer_settings(config: &PeerConfig) -> Result<PeerSettings, TunnelError> {
    let allowed_ip = config
        .allowed_ranges
        .first()
        .map(|r| r.trim().to_string())
        .ok_or_else(|| TunnelError::ConfigureFailed {
            reason: "no allowed ranges".to_string(),
        })?;

    Ok(PeerSettings {
        private_key: decode_key(&config.private_key, "PrivateKey")?,
        public_key: decode_key(&config.peer_public_key, "PublicKey")?,
        endpoint: config.peer_endpoint.trim().to_string(),
        allowed_ip,
        persistent_keepalive_interval: config.keepalive_seconds,
    })
}

/// Base64 key as written in the config -> hex as the control plane expects it
pub fn convert_key(b64: &str, field: &str) -> Result<String, TunnelError> {
    decode_key(b64, field).map(hex::encode)
}

fn decode_key(b64: &str, field: &str) -> Result<[u8; 32], TunnelError> {
    let bytes = BASE64
        .decode(b64.trim())
        .map_err(|_| TunnelError::InvalidKey {
            field: field.to_string(),
        })?;

    bytes.try_into().map_err(|_| TunnelError::InvalidKey {
        field: field.to_string(),
    })
}
