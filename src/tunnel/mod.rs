//! Tunnel device layer
//!
//! [`TunnelController`] drives any [`TunnelDevice`] through its lifecycle using
//! the key=value control protocol in [`uapi`]. The production device is
//! [`UserspaceDevice`]: a tun-rs interface with boringtun handling the
//! handshake and transport.

pub mod device;
pub mod uapi;
pub mod userspace;

pub use device::{
    convert_key, peer_settings, DeviceFactory, DeviceState, TunnelController, TunnelDevice,
    TunnelHandle,
};
pub use uapi::{parse_counters, DeviceStatus, PeerSettings};
pub use userspace::{UserspaceDevice, UserspaceDeviceFactory};
