//! Test doubles shared by the unit tests

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::api::{ForwardingRule, ResourceApi};
use crate::config::PeerConfig;
use crate::error::{ApiError, TunnelError};
use crate::net::{display_command, CommandOutput, CommandRunner};
use crate::tunnel::{DeviceFactory, TunnelDevice};

pub const ZERO_KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";
pub const PEER_KEY: &str = "YgkBjKXER5YarD8STsvMFURw/5nhCLIFOJ5uKWrrMW4=";

pub fn peer_config() -> PeerConfig {
    PeerConfig {
        local_address: "10.9.0.2/16".parse().unwrap(),
        local_dns: None,
        private_key: ZERO_KEY.to_string(),
        peer_public_key: PEER_KEY.to_string(),
        peer_endpoint: "203.0.113.7:51820".to_string(),
        allowed_ranges: vec!["10.9.0.0/16".to_string()],
        keepalive_seconds: 25,
    }
}

/// Write a config file for resource 4711 with the given `AllowedIPs` value
pub fn write_config(allowed_ips: &str) -> (NamedTempFile, PathBuf) {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        "[portmap]\nconfig_id = 4711\n\n\
         [Interface]\nPrivateKey = {}\nAddress = 10.9.0.2/16\n\n\
         [Peer]\nPublicKey = {}\nAllowedIPs = {}\nEndpoint = 203.0.113.7:51820\n",
        ZERO_KEY, PEER_KEY, allowed_ips
    )
    .unwrap();
    file.flush().unwrap();
    let path = file.path().to_path_buf();
    (file, path)
}

#[derive(Default)]
struct DeviceCalls {
    creates: usize,
    configs: Vec<String>,
    ups: usize,
    closes: usize,
    counters: (u64, u64),
}

/// What the fake devices were asked to do
#[derive(Clone, Default)]
pub struct DeviceLog(Arc<Mutex<DeviceCalls>>);

impl DeviceLog {
    pub fn creates(&self) -> usize {
        self.0.lock().unwrap().creates
    }

    pub fn configs(&self) -> Vec<String> {
        self.0.lock().unwrap().configs.clone()
    }

    pub fn ups(&self) -> usize {
        self.0.lock().unwrap().ups
    }

    pub fn closes(&self) -> usize {
        self.0.lock().unwrap().closes
    }

    /// Counters reported by every device created from this log
    pub fn set_counters(&self, rx_bytes: u64, tx_bytes: u64) {
        self.0.lock().unwrap().counters = (rx_bytes, tx_bytes);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Create,
    Configure,
    Up,
}

pub struct FakeDeviceFactory {
    log: DeviceLog,
    failure: Option<Failure>,
}

impl FakeDeviceFactory {
    pub fn new(log: DeviceLog) -> Self {
        Self { log, failure: None }
    }

    pub fn failing(mut self, failure: Failure) -> Self {
        self.failure = Some(failure);
        self
    }
}

impl DeviceFactory for FakeDeviceFactory {
    fn create(&self) -> Result<(Box<dyn TunnelDevice>, String), TunnelError> {
        if self.failure == Some(Failure::Create) {
            return Err(TunnelError::CreateFailed {
                reason: "operation not permitted".to_string(),
            });
        }
        self.log.0.lock().unwrap().creates += 1;
        let device = FakeDevice {
            log: self.log.clone(),
            failure: self.failure,
        };
        Ok((Box::new(device), "wg0".to_string()))
    }
}

struct FakeDevice {
    log: DeviceLog,
    failure: Option<Failure>,
}

#[async_trait]
impl TunnelDevice for FakeDevice {
    async fn configure(&mut self, config: &str) -> Result<(), TunnelError> {
        if self.failure == Some(Failure::Configure) {
            return Err(TunnelError::ConfigureFailed {
                reason: "invalid argument".to_string(),
            });
        }
        self.log.0.lock().unwrap().configs.push(config.to_string());
        Ok(())
    }

    async fn up(&mut self) -> Result<(), TunnelError> {
        if self.failure == Some(Failure::Up) {
            return Err(TunnelError::Io(io::Error::new(
                io::ErrorKind::AddrInUse,
                "address in use",
            )));
        }
        self.log.0.lock().unwrap().ups += 1;
        Ok(())
    }

    fn status(&self) -> Result<String, TunnelError> {
        let (rx, tx) = self.log.0.lock().unwrap().counters;
        Ok(format!(
            "listen_port=40000\nrx_bytes={}\ntx_bytes={}\nlast_handshake_time_sec=0\n",
            rx, tx
        ))
    }

    async fn close(&mut self) -> Result<(), TunnelError> {
        self.log.0.lock().unwrap().closes += 1;
        Ok(())
    }
}

#[derive(Default)]
struct RunnerState {
    calls: Vec<String>,
    failures: Vec<(String, String)>,
    responses: HashMap<String, String>,
}

/// Records commands instead of spawning them
#[derive(Clone, Default)]
pub struct RecordingRunner(Arc<Mutex<RunnerState>>);

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands starting with `prefix` exit with status 2 and `output`
    pub fn fail_on(self, prefix: &str, output: &str) -> Self {
        self.0
            .lock()
            .unwrap()
            .failures
            .push((prefix.to_string(), output.to_string()));
        self
    }

    /// The exact command `command` succeeds printing `stdout`
    pub fn respond_to(self, command: &str, stdout: &str) -> Self {
        self.0
            .lock()
            .unwrap()
            .responses
            .insert(command.to_string(), stdout.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
        let command = display_command(program, args);
        let mut state = self.0.lock().unwrap();
        state.calls.push(command.clone());

        if let Some((_, output)) = state
            .failures
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
        {
            return Ok(CommandOutput {
                success: false,
                code: Some(2),
                output: output.clone(),
            });
        }

        Ok(CommandOutput {
            success: true,
            code: Some(0),
            output: state.responses.get(&command).cloned().unwrap_or_default(),
        })
    }
}

/// Serves a fixed rule list and remembers which resources were asked for
#[derive(Clone)]
pub struct CannedApi {
    rules: Vec<ForwardingRule>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl CannedApi {
    pub fn new(rules: Vec<ForwardingRule>) -> Self {
        Self {
            rules,
            requests: Arc::default(),
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResourceApi for CannedApi {
    async fn list_forwarding_rules(
        &self,
        resource_id: &str,
    ) -> Result<Vec<ForwardingRule>, ApiError> {
        self.requests.lock().unwrap().push(resource_id.to_string());
        Ok(self.rules.clone())
    }
}

/// In-memory writer that can be inspected while something else owns a clone
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
