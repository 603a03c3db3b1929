//! Host Inspection Sources
//!
//! Collaborator traits for the OS process table and the network connection
//! table, plus host-backed implementations. The scanners only ever see these
//! traits, so tests substitute fixture sources and the host backends stay
//! swappable.

use std::process::Command;

use parking_lot::Mutex;
use sysinfo::System;

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug, Clone)]
pub struct InspectError(pub String);

impl std::fmt::Display for InspectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "InspectError: {}", self.0)
    }
}

impl std::error::Error for InspectError {}

// ============================================================================
// SAMPLES
// ============================================================================

/// One running process as seen by the process source.
#[derive(Debug, Clone)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub command_line: String,
    pub cpu_percent: f32,
    pub memory_bytes: u64,
    /// Unix seconds. Zero when the platform does not report it.
    pub start_time: u64,
}

/// One established connection as seen by the connection source.
#[derive(Debug, Clone)]
pub struct ConnectionSample {
    pub remote_ip: String,
    pub remote_port: u16,
    /// Resolved remote hostname, when the source can provide one. Service
    /// classification needs it; samples without it are never classified.
    pub remote_host: Option<String>,
    pub pid: Option<u32>,
    pub process_name: Option<String>,
}

// ============================================================================
// COLLABORATOR TRAITS
// ============================================================================

pub trait ProcessSource: Send + Sync {
    fn processes(&self) -> Result<Vec<ProcessSample>, InspectError>;
}

pub trait ConnectionSource: Send + Sync {
    /// Established connections only.
    fn connections(&self) -> Result<Vec<ConnectionSample>, InspectError>;
}

// ============================================================================
// HOST PROCESS SOURCE (sysinfo)
// ============================================================================

pub struct HostProcessSource {
    system: Mutex<System>,
}

impl HostProcessSource {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new_all()),
        }
    }
}

impl Default for HostProcessSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSource for HostProcessSource {
    fn processes(&self) -> Result<Vec<ProcessSample>, InspectError> {
        let mut system = self.system.lock();
        system.refresh_all();

        let samples = system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessSample {
                pid: pid.as_u32(),
                name: process.name().to_string(),
                command_line: process.cmd().join(" "),
                cpu_percent: process.cpu_usage(),
                memory_bytes: process.memory(),
                start_time: process.start_time(),
            })
            .collect();

        Ok(samples)
    }
}

// ============================================================================
// HOST CONNECTION SOURCE (command-output parsing)
// ============================================================================

/// Socket enumeration via `ss` output. sysinfo has no per-connection table,
/// so this parses the same command an operator would run. Hostnames come
/// from `getent hosts` per remote ip; lookup failures leave the sample
/// unresolved rather than dropping it.
pub struct HostConnectionSource;

impl ConnectionSource for HostConnectionSource {
    fn connections(&self) -> Result<Vec<ConnectionSample>, InspectError> {
        if !cfg!(target_os = "linux") {
            log::warn!("Connection enumeration is only wired up for linux hosts");
            return Ok(Vec::new());
        }

        let output = Command::new("ss")
            .args(["-t", "-n", "-p", "state", "established"])
            .output()
            .map_err(|e| InspectError(format!("ss invocation failed: {}", e)))?;

        if !output.status.success() {
            return Err(InspectError(format!(
                "ss exited with {}",
                output.status.code().unwrap_or(-1)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut samples = Vec::new();
        for line in stdout.lines().skip(1) {
            if let Some(mut sample) = parse_ss_line(line) {
                sample.remote_host = resolve_hostname(&sample.remote_ip);
                samples.push(sample);
            }
        }

        Ok(samples)
    }
}

/// Parse one `ss -tnp` data line:
/// `ESTAB 0 0 10.0.0.5:55312 104.18.123.45:443 users:(("python3",pid=812,fd=7))`
fn parse_ss_line(line: &str) -> Option<ConnectionSample> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 4 {
        return None;
    }

    // Peer address is the 4th column when ss omits the state column (it was
    // given as a filter), the 5th otherwise.
    let peer = if fields[0].chars().all(|c| c.is_ascii_digit()) {
        fields[3]
    } else {
        *fields.get(4)?
    };
    let (ip, port) = peer.rsplit_once(':')?;
    let remote_port: u16 = port.parse().ok()?;
    let remote_ip = ip.trim_start_matches('[').trim_end_matches(']').to_string();

    let (pid, process_name) = fields
        .last()
        .and_then(|f| parse_ss_users(f))
        .map(|(name, pid)| (Some(pid), Some(name)))
        .unwrap_or((None, None));

    Some(ConnectionSample {
        remote_ip,
        remote_port,
        remote_host: None,
        pid,
        process_name,
    })
}

/// Parse `users:(("python3",pid=812,fd=7))`.
fn parse_ss_users(field: &str) -> Option<(String, u32)> {
    let inner = field.strip_prefix("users:((")?;
    let name = inner.split('"').nth(1)?.to_string();
    let pid = inner
        .split("pid=")
        .nth(1)?
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .ok()?;
    Some((name, pid))
}

fn resolve_hostname(ip: &str) -> Option<String> {
    let output = Command::new("getent").args(["hosts", ip]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .split_whitespace()
        .nth(1)
        .map(|host| host.to_string())
}

// ============================================================================
// UNIT TESTS
// ============================================================================
