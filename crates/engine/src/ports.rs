//! Port allocation and conflict detection
//!
//! A single `PortAllocator` is shared by everything in a run. It keeps the
//! set of ports this process has claimed and a scene -> port map, both behind
//! one lock. OS-level availability is probed by connecting to the port: a
//! successful connect means something is listening.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uibench_common::{Error, PortRange, Result};

/// How long a single connect probe may take
const PROBE_TIMEOUT: Duration = Duration::from_millis(250);

/// Poll interval while waiting for a port to change state
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Options for a single allocation
#[derive(Debug, Clone, Default)]
pub struct AllocateOptions {
    /// Port to try first
    pub preferred: Option<u16>,

    /// Range override (defaults to the allocator's range)
    pub range: Option<PortRange>,

    /// Ports that must not be returned
    pub exclude: Vec<u16>,
}

impl AllocateOptions {
    pub fn preferred(port: u16) -> Self {
        Self {
            preferred: Some(port),
            ..Default::default()
        }
    }

    pub fn in_range(range: PortRange) -> Self {
        Self {
            range: Some(range),
            ..Default::default()
        }
    }
}

#[derive(Default)]
struct PortState {
    claimed: BTreeSet<u16>,
    by_scene: HashMap<String, u16>,
}

/// Hands out process-unique TCP ports
pub struct PortAllocator {
    range: PortRange,
    state: Mutex<PortState>,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(PortRange::default())
    }
}

impl PortAllocator {
    /// Create an allocator over the given default range
    pub fn new(range: PortRange) -> Self {
        Self {
            range,
            state: Mutex::new(PortState::default()),
        }
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Allocate a free port.
    ///
    /// The preferred port is tried first when it lies inside the range. A
    /// candidate is claimed before it is probed, so concurrent callers never
    /// race on the same port; a candidate found busy is unclaimed again.
    pub async fn allocate(&self, options: &AllocateOptions) -> Result<u16> {
        let range = options.range.unwrap_or(self.range);
        if range.min == 0 || range.min > range.max {
            return Err(Error::InvalidConfig(format!(
                "invalid port range {}-{}",
                range.min, range.max
            )));
        }

        let preferred = options.preferred.filter(|p| range.contains(*p));
        let candidates = preferred
            .into_iter()
            .chain((range.min..=range.max).filter(move |p| Some(*p) != preferred));

        for port in candidates {
            if options.exclude.contains(&port) || !self.try_claim(port) {
                continue;
            }

            if is_port_in_use(port).await {
                debug!(port, "Port busy, trying next");
                self.release(port);
                continue;
            }

            debug!(port, "Allocated port");
            return Ok(port);
        }

        Err(Error::PortUnavailable {
            min: range.min,
            max: range.max,
        })
    }

    fn try_claim(&self, port: u16) -> bool {
        self.state.lock().claimed.insert(port)
    }

    /// Mark a port as reusable. Returns whether it was claimed.
    pub fn release(&self, port: u16) -> bool {
        self.state.lock().claimed.remove(&port)
    }

    /// Whether this process currently claims the port
    pub fn is_claimed(&self, port: u16) -> bool {
        self.state.lock().claimed.contains(&port)
    }

    /// All ports currently claimed, ascending
    pub fn allocated_ports(&self) -> Vec<u16> {
        self.state.lock().claimed.iter().copied().collect()
    }

    /// Whether something is listening on the port
    pub async fn is_in_use(&self, port: u16) -> bool {
        is_port_in_use(port).await
    }

    /// Wait until the port accepts connections
    pub async fn wait_until_ready(&self, port: u16, limit: Duration) -> bool {
        let start = Instant::now();
        loop {
            if is_port_in_use(port).await {
                return true;
            }
            if start.elapsed() >= limit {
                return false;
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Terminate whatever is listening on `port` and wait for it to go away.
    ///
    /// Listeners get SIGTERM first; with `force_kill`, anything still bound
    /// after half of `limit` gets SIGKILL. Returns whether the port is free.
    /// The calling process is never signalled.
    pub async fn force_release(&self, port: u16, limit: Duration, force_kill: bool) -> bool {
        if !is_port_in_use(port).await {
            return true;
        }

        let pids = listening_pids(port).await;
        if pids.is_empty() {
            warn!(port, "Port is busy but no owning process was found");
        } else {
            info!(port, pids = ?pids, "port.force_release");
            signal_all(&pids, false);
        }

        let start = Instant::now();
        let mut escalated = false;
        loop {
            sleep(POLL_INTERVAL).await;

            if !is_port_in_use(port).await {
                info!(port, elapsed_ms = start.elapsed().as_millis() as u64, "Port released");
                return true;
            }

            if start.elapsed() >= limit {
                warn!(port, "Port still in use after {}ms", limit.as_millis());
                return false;
            }

            if force_kill && !escalated && start.elapsed() >= limit / 2 {
                escalated = true;
                let pids = listening_pids(port).await;
                if !pids.is_empty() {
                    warn!(port, pids = ?pids, "Escalating to SIGKILL");
                    signal_all(&pids, true);
                }
            }
        }
    }

    /// Allocate a port for a scene. Repeated calls return the same port.
    pub async fn allocate_for_scene(&self, scene_id: &str, options: &AllocateOptions) -> Result<u16> {
        if let Some(port) = self.scene_port(scene_id) {
            return Ok(port);
        }

        let port = self.allocate(options).await?;

        let mut state = self.state.lock();
        if let Some(existing) = state.by_scene.get(scene_id).copied() {
            // Another caller won the race for this scene
            state.claimed.remove(&port);
            return Ok(existing);
        }
        state.by_scene.insert(scene_id.to_string(), port);
        Ok(port)
    }

    /// Release the port held by a scene
    pub fn release_for_scene(&self, scene_id: &str) -> Option<u16> {
        let mut state = self.state.lock();
        let port = state.by_scene.remove(scene_id)?;
        state.claimed.remove(&port);
        Some(port)
    }

    pub fn scene_port(&self, scene_id: &str) -> Option<u16> {
        self.state.lock().by_scene.get(scene_id).copied()
    }

    /// Drop every claim, scene-mapped or not
    pub fn release_all(&self) {
        let mut state = self.state.lock();
        state.by_scene.clear();
        state.claimed.clear();
    }
}

/// Probe a port on both loopback addresses
pub async fn is_port_in_use(port: u16) -> bool {
    for host in ["127.0.0.1", "::1"] {
        if let Ok(Ok(_)) = timeout(PROBE_TIMEOUT, TcpStream::connect((host, port))).await {
            return true;
        }
    }
    false
}

/// Find the processes listening on a TCP port, excluding this process.
#[cfg(unix)]
async fn listening_pids(port: u16) -> Vec<i32> {
    use tokio::process::Command;

    let own = std::process::id() as i32;

    let lsof = Command::new("lsof")
        .args(["-nP", "-t", &format!("-iTCP:{}", port), "-sTCP:LISTEN"])
        .output()
        .await;

    let stdout = match lsof {
        Ok(output) => output.stdout,
        Err(e) => {
            debug!("lsof unavailable ({}), trying fuser", e);
            match Command::new("fuser")
                .args(["-n", "tcp", &port.to_string()])
                .output()
                .await
            {
                Ok(output) => output.stdout,
                Err(e) => {
                    warn!("No port introspection tool available: {}", e);
                    return Vec::new();
                }
            }
        }
    };

    parse_pids(&String::from_utf8_lossy(&stdout))
        .into_iter()
        .filter(|pid| *pid != own)
        .collect()
}

#[cfg(not(unix))]
async fn listening_pids(_port: u16) -> Vec<i32> {
    Vec::new()
}

fn parse_pids(output: &str) -> Vec<i32> {
    let mut pids: Vec<i32> = output
        .split_whitespace()
        .filter_map(|token| token.trim_end_matches(|c: char| !c.is_ascii_digit()).parse().ok())
        .filter(|pid| *pid > 0)
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

#[cfg(unix)]
fn signal_all(pids: &[i32], force: bool) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    for pid in pids {
        if let Err(e) = kill(Pid::from_raw(*pid), signal) {
            debug!(pid, "Failed to send {:?}: {}", signal, e);
        }
    }
}

#[cfg(not(unix))]
fn signal_all(_pids: &[i32], _force: bool) {}
