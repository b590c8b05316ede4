//! Userspace tunnel device
//!
//! A tun-rs virtual interface paired with a boringtun noise engine. Once
//! activated, a single pump task moves packets between the interface and the
//! peer's UDP endpoint:
//! - TUN read -> encapsulate -> UDP send
//! - UDP recv -> decapsulate -> peer filter -> TUN write
//! - periodic timer -> handshake retransmission and keepalives

use std::net::{IpAddr, SocketAddr};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use boringtun::noise::{Tunn, TunnResult};
use boringtun::x25519::{PublicKey, StaticSecret};
use ipnet::IpNet;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tun_rs::{AsyncDevice, DeviceBuilder};

use crate::error::TunnelError;
use crate::tunnel::device::{DeviceFactory, TunnelDevice};
use crate::tunnel::uapi::{DeviceStatus, PeerSettings};

/// MTU for the virtual interface
const DEFAULT_MTU: u16 = 1420;

/// Buffer size for packets
const BUFFER_SIZE: usize = 65535;

/// boringtun expects its timers to be updated a few times per second
const TIMER_TICK: Duration = Duration::from_millis(250);

/// Consecutive TUN read failures before the pump gives up
const MAX_TUN_READ_ERRORS: u32 = 10;

/// Pause after a failed TUN read
const TUN_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Interface name requested from the OS
#[cfg(not(target_os = "macos"))]
const DEFAULT_TUNNEL_NAME: &str = "wg0";

/// Creates [`UserspaceDevice`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct UserspaceDeviceFactory;

impl DeviceFactory for UserspaceDeviceFactory {
    fn create(&self) -> Result<(Box<dyn TunnelDevice>, String), TunnelError> {
        check_privileges()?;

        #[cfg(not(target_os = "macos"))]
        let builder = DeviceBuilder::new().name(DEFAULT_TUNNEL_NAME);

        // The kernel picks the next free utunN
        #[cfg(target_os = "macos")]
        let builder = DeviceBuilder::new();

        let device = builder
            .mtu(DEFAULT_MTU)
            .build_async()
            .map_err(|e| TunnelError::CreateFailed {
                reason: e.to_string(),
            })?;

        let name = device.deref().name().map_err(|e| TunnelError::CreateFailed {
            reason: format!("Failed to get device name: {}", e),
        })?;

        let device = UserspaceDevice {
            tun: Arc::new(device),
            name: name.clone(),
            peer: None,
            endpoint: None,
            counters: Arc::new(Counters::default()),
            running: None,
        };

        Ok((Box::new(device), name))
    }
}

/// Byte counters shared between the pump and status queries
#[derive(Debug, Default)]
struct Counters {
    rx_bytes: AtomicU64,
    tx_bytes: AtomicU64,
    last_handshake: AtomicU64,
}

/// Handles owned while the pump runs
struct Running {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    listen_port: u16,
}

/// Tunnel device backed by a TUN interface and boringtun
pub struct UserspaceDevice {
    tun: Arc<AsyncDevice>,
    name: String,
    peer: Option<PeerSettings>,
    endpoint: Option<SocketAddr>,
    counters: Arc<Counters>,
    running: Option<Running>,
}

#[async_trait]
impl TunnelDevice for UserspaceDevice {
    async fn configure(&mut self, config: &str) -> Result<(), TunnelError> {
        let peer = PeerSettings::from_config_text(config)
            .map_err(|reason| TunnelError::ConfigureFailed { reason })?;

        peer.allowed_ip
            .parse::<IpNet>()
            .or_else(|_| peer.allowed_ip.parse::<IpAddr>().map(IpNet::from))
            .map_err(|_| TunnelError::ConfigureFailed {
                reason: format!("invalid allowed_ip: {}", peer.allowed_ip),
            })?;

        let endpoint = tokio::net::lookup_host(peer.endpoint.as_str())
            .await
            .map_err(|e| TunnelError::ConfigureFailed {
                reason: format!("failed to resolve endpoint {}: {}", peer.endpoint, e),
            })?
            .next()
            .ok_or_else(|| TunnelError::ConfigureFailed {
                reason: format!("endpoint {} resolved to no addresses", peer.endpoint),
            })?;

        tracing::debug!("Resolved peer endpoint {} to {}", peer.endpoint, endpoint);
        self.endpoint = Some(endpoint);
        self.peer = Some(peer);
        Ok(())
    }

    async fn up(&mut self) -> Result<(), TunnelError> {
        if self.running.is_some() {
            return Ok(());
        }

        let (peer, endpoint) = match (&self.peer, self.endpoint) {
            (Some(peer), Some(endpoint)) => (peer, endpoint),
            _ => {
                return Err(TunnelError::ActivationFailed {
                    reason: "device has no peer configuration".to_string(),
                })
            }
        };

        // Parsed successfully in configure()
        let allowed: IpNet = peer
            .allowed_ip
            .parse()
            .or_else(|_| peer.allowed_ip.parse::<IpAddr>().map(IpNet::from))
            .map_err(|_| TunnelError::ActivationFailed {
                reason: format!("invalid allowed_ip: {}", peer.allowed_ip),
            })?;

        let bind_addr = match endpoint {
            SocketAddr::V4(_) => "0.0.0.0:0",
            SocketAddr::V6(_) => "[::]:0",
        };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| TunnelError::ActivationFailed {
                reason: format!("failed to bind UDP socket: {}", e),
            })?;
        socket
            .connect(endpoint)
            .await
            .map_err(|e| TunnelError::ActivationFailed {
                reason: format!("failed to connect UDP socket to {}: {}", endpoint, e),
            })?;
        let listen_port = socket.local_addr().map(|a| a.port()).unwrap_or(0);

        let tunn = new_session(peer)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pump = Pump {
            tun: self.tun.clone(),
            socket,
            tunn,
            allowed,
            counters: self.counters.clone(),
        };
        let task = tokio::spawn(pump.run(shutdown_rx));

        tracing::info!(
            "Tunnel {} sending to {} from UDP port {}",
            self.name,
            endpoint,
            listen_port
        );

        self.running = Some(Running {
            shutdown_tx,
            task,
            listen_port,
        });
        Ok(())
    }

    fn status(&self) -> Result<String, TunnelError> {
        let last_handshake = self.counters.last_handshake.load(Ordering::Relaxed);
        let status = DeviceStatus {
            private_key: self.peer.as_ref().map(|p| p.private_key),
            listen_port: self.running.as_ref().map(|r| r.listen_port),
            public_key: self.peer.as_ref().map(|p| p.public_key),
            endpoint: self.endpoint.map(|e| e.to_string()),
            persistent_keepalive_interval: self
                .peer
                .as_ref()
                .map(|p| p.persistent_keepalive_interval),
            allowed_ip: self.peer.as_ref().map(|p| p.allowed_ip.clone()),
            rx_bytes: self.counters.rx_bytes.load(Ordering::Relaxed),
            tx_bytes: self.counters.tx_bytes.load(Ordering::Relaxed),
            last_handshake_time_sec: (last_handshake != 0).then_some(last_handshake),
        };
        Ok(status.to_status_text())
    }

    async fn close(&mut self) -> Result<(), TunnelError> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        let _ = running.shutdown_tx.send(true);
        if tokio::time::timeout(Duration::from_secs(2), running.task)
            .await
            .is_err()
        {
            tracing::warn!("Pump for {} did not stop in time", self.name);
        }
        Ok(())
    }
}

/// Noise session for the configured peer
fn new_session(peer: &PeerSettings) -> Result<Tunn, TunnelError> {
    let keepalive = match peer.persistent_keepalive_interval {
        0 => None,
        secs => Some(secs),
    };

    Tunn::new(
        StaticSecret::from(peer.private_key),
        PublicKey::from(peer.public_key),
        None,
        keepalive,
        rand::random::<u32>() >> 8,
        None,
    )
    .map_err(|e| TunnelError::ActivationFailed {
        reason: format!("failed to create session: {}", e),
    })
}

/// Counts consecutive failures of a read loop
#[derive(Debug)]
struct ErrorStreak {
    count: u32,
    limit: u32,
}

impl ErrorStreak {
    fn new(limit: u32) -> Self {
        Self { count: 0, limit }
    }

    fn reset(&mut self) {
        self.count = 0;
    }

    /// Returns true once `limit` failures happened in a row
    fn record(&mut self) -> bool {
        self.count += 1;
        self.count >= self.limit
    }
}

/// Packet pump state, owned by the spawned task
struct Pump {
    tun: Arc<AsyncDevice>,
    socket: UdpSocket,
    tunn: Tunn,
    allowed: IpNet,
    counters: Arc<Counters>,
}

impl Pump {
    async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut tun_buf = vec![0u8; BUFFER_SIZE];
        let mut udp_buf = vec![0u8; BUFFER_SIZE];
        let mut out_buf = vec![0u8; BUFFER_SIZE];
        let mut timers = interval(TIMER_TICK);
        let mut tun_errors = ErrorStreak::new(MAX_TUN_READ_ERRORS);

        if let TunnResult::WriteToNetwork(init) =
            self.tunn.format_handshake_initiation(&mut out_buf, false)
        {
            let len = init.len();
            if let Err(e) = self.socket.send(init).await {
                tracing::warn!("Failed to send handshake initiation: {}", e);
            } else {
                self.counters.tx_bytes.fetch_add(len as u64, Ordering::Relaxed);
            }
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    tracing::debug!("Pump received shutdown signal");
                    break;
                }

                _ = timers.tick() => {
                    match self.tunn.update_timers(&mut out_buf) {
                        TunnResult::WriteToNetwork(packet) => {
                            let len = packet.len();
                            if self.socket.send(packet).await.is_ok() {
                                self.counters.tx_bytes.fetch_add(len as u64, Ordering::Relaxed);
                            }
                        }
                        TunnResult::Err(e) => tracing::trace!("Timer error: {:?}", e),
                        _ => {}
                    }
                }

                result = self.tun.recv(&mut tun_buf) => {
                    match result {
                        Ok(len) => {
                            tun_errors.reset();
                            self.outbound(&tun_buf[..len], &mut out_buf).await;
                        }
                        Err(e) => {
                            if tun_errors.record() {
                                tracing::error!("TUN read keeps failing, stopping pump: {}", e);
                                break;
                            }
                            tracing::warn!("TUN read error: {}", e);
                            tokio::time::sleep(TUN_ERROR_BACKOFF).await;
                        }
                    }
                }

                result = self.socket.recv(&mut udp_buf) => {
                    match result {
                        Ok(len) => {
                            self.counters.rx_bytes.fetch_add(len as u64, Ordering::Relaxed);
                            self.inbound(&udp_buf[..len], &mut out_buf).await;
                        }
                        Err(e) => tracing::trace!("UDP recv error: {}", e),
                    }
                }
            }
        }

        tracing::debug!("Pump exiting");
    }

    async fn outbound(&mut self, packet: &[u8], out_buf: &mut [u8]) {
        match self.tunn.encapsulate(packet, out_buf) {
            TunnResult::WriteToNetwork(encrypted) => {
                let len = encrypted.len();
                match self.socket.send(encrypted).await {
                    Ok(_) => {
                        self.counters.tx_bytes.fetch_add(len as u64, Ordering::Relaxed);
                    }
                    Err(e) => tracing::warn!("UDP send error: {}", e),
                }
            }
            TunnResult::Err(e) => tracing::trace!("Encapsulate error: {:?}", e),
            _ => {}
        }
    }

    async fn inbound(&mut self, datagram: &[u8], out_buf: &mut [u8]) {
        let peer_ip = self.socket.peer_addr().ok().map(|a| a.ip());

        let mut flush = match self.tunn.decapsulate(peer_ip, datagram, out_buf) {
            TunnResult::WriteToNetwork(reply) => {
                self.send_control(reply).await;
                true
            }
            TunnResult::WriteToTunnelV4(packet, src) => {
                self.deliver(packet, IpAddr::V4(src)).await;
                false
            }
            TunnResult::WriteToTunnelV6(packet, src) => {
                self.deliver(packet, IpAddr::V6(src)).await;
                false
            }
            TunnResult::Err(e) => {
                tracing::trace!("Decapsulate error: {:?}", e);
                false
            }
            TunnResult::Done => false,
        };

        // A completed handshake may release queued packets
        while flush {
            flush = match self.tunn.decapsulate(None, &[], out_buf) {
                TunnResult::WriteToNetwork(packet) => {
                    self.send_control(packet).await;
                    true
                }
                _ => false,
            };
        }
    }

    async fn send_control(&mut self, packet: &[u8]) {
        let len = packet.len();
        if let Err(e) = self.socket.send(packet).await {
            tracing::warn!("UDP send error: {}", e);
            return;
        }
        self.counters.tx_bytes.fetch_add(len as u64, Ordering::Relaxed);

        if self.tunn.time_since_last_handshake().is_some() {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            self.counters.last_handshake.store(now, Ordering::Relaxed);
        }
    }

    async fn deliver(&mut self, packet: &[u8], src: IpAddr) {
        if packet.is_empty() {
            // keepalive
            return;
        }
        if !self.allowed.contains(&src) {
            tracing::trace!("Dropping packet from {} outside {}", src, self.allowed);
            return;
        }
        if let Err(e) = self.tun.send(packet).await {
            tracing::warn!("TUN write error: {}", e);
        }
    }
}

/// Check for required privileges to create TUN devices
fn check_privileges() -> Result<(), TunnelError> {
    #[cfg(unix)]
    {
        if unsafe { libc::geteuid() } != 0 {
            #[cfg(target_os = "linux")]
            {
                tracing::warn!("Running without root. TUN creation may fail.");
                tracing::warn!("Either run with sudo or grant CAP_NET_ADMIN:");
                tracing::warn!("  sudo setcap cap_net_admin=eip ./portmap");
            }

            #[cfg(target_os = "macos")]
            {
                return Err(TunnelError::InsufficientPrivileges {
                    message: "Root privileges required on macOS. Run with sudo.".to_string(),
                });
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        if !is_elevated_windows() {
            return Err(TunnelError::InsufficientPrivileges {
                message: "Administrator privileges required on Windows.".to_string(),
            });
        }
    }

    Ok(())
}

/// Check if running as Administrator on Windows
#[cfg(target_os = "windows")]
fn is_elevated_windows() -> bool {
    use std::mem::MaybeUninit;
    use std::ptr::null_mut;

    use winapi::um::handleapi::CloseHandle;
    use winapi::um::processthreadsapi::{GetCurrentProcess, OpenProcessToken};
    use winapi::um::securitybaseapi::GetTokenInformation;
    use winapi::um::winnt::{TokenElevation, HANDLE, TOKEN_ELEVATION, TOKEN_QUERY};

    unsafe {
        let mut token: HANDLE = null_mut();
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) == 0 {
            return false;
        }

        let mut elevation: MaybeUninit<TOKEN_ELEVATION> = MaybeUninit::uninit();
        let mut size = std::mem::size_of::<TOKEN_ELEVATION>() as u32;
        let ok = GetTokenInformation(
            token,
            TokenElevation,
            elevation.as_mut_ptr() as *mut _,
            size,
            &mut size,
        );
        CloseHandle(token);

        ok != 0 && elevation.assume_init().TokenIsElevated != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(keepalive: u16) -> PeerSettings {
        let peer_secret = StaticSecret::from([7u8; 32]);
        PeerSettings {
            private_key: [1u8; 32],
            public_key: PublicKey::from(&peer_secret).to_bytes(),
            endpoint: "203.0.113.7:51820".to_string(),
            allowed_ip: "10.9.0.0/16".to_string(),
            persistent_keepalive_interval: keepalive,
        }
    }

    #[test]
    fn test_new_session_produces_handshake_initiation() {
        let mut tunn = new_session(&settings(25)).unwrap();
        let mut buf = vec![0u8; 2048];
        match tunn.format_handshake_initiation(&mut buf, false) {
            // type 1 message, 148 bytes on the wire
            TunnResult::WriteToNetwork(packet) => {
                assert_eq!(packet.len(), 148);
                assert_eq!(packet[0], 1);
            }
            _ => panic!("expected a handshake initiation"),
        }
    }

    #[test]
    fn test_new_session_without_keepalive() {
        assert!(new_session(&settings(0)).is_ok());
    }

    #[test]
    fn test_error_streak_stops_after_limit() {
        let mut streak = ErrorStreak::new(3);
        assert!(!streak.record());
        assert!(!streak.record());
        assert!(streak.record());
    }

    #[test]
    fn test_error_streak_reset_on_success() {
        let mut streak = ErrorStreak::new(2);
        assert!(!streak.record());
        streak.reset();
        assert!(!streak.record());
        assert!(streak.record());
    }
}
