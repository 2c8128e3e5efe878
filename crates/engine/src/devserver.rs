//! Local dev server lifecycle
//!
//! Each `localProject` scene gets one dev server for the duration of a run.
//! The manager owns the child processes; callers only ever see
//! `DevServerInstance` snapshots. A server moves
//! `starting -> ready -> stopped` or `starting -> error`, nothing else.

use crate::ports::PortAllocator;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use uibench_common::{DevServerInstance, DevServerStatus, Error, Result, SceneSource};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const PACKAGE_MANIFEST: &str = "package.json";

/// How to start one dev server
#[derive(Debug, Clone)]
pub struct DevServerConfig {
    pub project_path: PathBuf,
    pub port: u16,
    /// Skipped when `None`
    pub install_command: Option<String>,
    pub dev_command: String,
    pub ready_timeout: Duration,
    pub ready_poll_interval: Duration,
}

impl DevServerConfig {
    /// Build from a scene source. Relative project paths resolve against `base_dir`.
    pub fn from_source(source: &SceneSource, port: u16, base_dir: &Path) -> Option<Self> {
        match source {
            SceneSource::BaseUrl { .. } => None,
            SceneSource::LocalProject {
                project_path,
                dev_command,
                install_command,
                ready_timeout,
                ready_poll_interval,
            } => Some(Self {
                project_path: if project_path.is_absolute() {
                    project_path.clone()
                } else {
                    base_dir.join(project_path)
                },
                port,
                install_command: install_command.clone(),
                dev_command: dev_command.clone(),
                ready_timeout: Duration::from_millis(*ready_timeout),
                ready_poll_interval: ready_poll_interval
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_POLL_INTERVAL),
            }),
        }
    }
}

/// Manager-wide timings
#[derive(Debug, Clone)]
pub struct DevServerSettings {
    /// Time between SIGTERM and SIGKILL on stop
    pub stop_grace: Duration,
    pub install_timeout: Duration,
    /// Budget for reclaiming a port after a stop or failed start
    pub release_timeout: Duration,
    /// Per-request timeout of the HTTP readiness probe
    pub probe_timeout: Duration,
}

impl Default for DevServerSettings {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(5),
            install_timeout: Duration::from_secs(300),
            release_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

struct TrackedServer {
    instance: DevServerInstance,
    child: Option<Child>,
}

/// Starts, tracks, and stops dev servers keyed by scene id
pub struct DevServerManager {
    ports: Arc<PortAllocator>,
    servers: Mutex<HashMap<String, TrackedServer>>,
    http: reqwest::Client,
    settings: DevServerSettings,
}

impl DevServerManager {
    pub fn new(ports: Arc<PortAllocator>) -> Result<Self> {
        Self::with_settings(ports, DevServerSettings::default())
    }

    pub fn with_settings(ports: Arc<PortAllocator>, settings: DevServerSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.probe_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            ports,
            servers: Mutex::new(HashMap::new()),
            http,
            settings,
        })
    }

    pub fn ports(&self) -> &Arc<PortAllocator> {
        &self.ports
    }

    /// Start the dev server for a scene and wait until it serves HTTP.
    ///
    /// A scene that is already ready is returned as-is. On any failure the
    /// instance is left in `error`, its process is killed, and its port is
    /// reclaimed before the error is returned.
    pub async fn start(&self, scene_id: &str, config: &DevServerConfig) -> Result<DevServerInstance> {
        let project_path = &config.project_path;
        if !project_path.exists() {
            return Err(Error::ProjectNotFound(project_path.clone()));
        }
        if !project_path.join(PACKAGE_MANIFEST).exists() {
            return Err(Error::ManifestMissing {
                manifest: PACKAGE_MANIFEST.to_string(),
                path: project_path.clone(),
            });
        }

        {
            let mut servers = self.servers.lock();
            match servers.get(scene_id).map(|s| s.instance.status) {
                Some(DevServerStatus::Ready) => {
                    debug!(scene_id, "Dev server already running");
                    return Ok(servers[scene_id].instance.clone());
                }
                Some(DevServerStatus::Starting) => {
                    return Err(Error::AlreadyExists {
                        kind: "dev server".to_string(),
                        id: scene_id.to_string(),
                    });
                }
                _ => {}
            }

            servers.insert(
                scene_id.to_string(),
                TrackedServer {
                    instance: DevServerInstance {
                        scene_id: scene_id.to_string(),
                        project_path: project_path.clone(),
                        port: config.port,
                        url: format!("http://localhost:{}", config.port),
                        status: DevServerStatus::Starting,
                        pid: None,
                        error: None,
                    },
                    child: None,
                },
            );
        }

        info!(scene_id, port = config.port, path = %project_path.display(), "devserver.start");

        match self.launch(scene_id, config).await {
            Ok(instance) => {
                info!(scene_id, url = %instance.url, pid = ?instance.pid, "devserver.ready");
                Ok(instance)
            }
            Err(e) => {
                error!(scene_id, "devserver.error: {}", e);
                self.fail(scene_id, config.port, &e).await;
                Err(e)
            }
        }
    }

    async fn launch(&self, scene_id: &str, config: &DevServerConfig) -> Result<DevServerInstance> {
        if self.ports.is_in_use(config.port).await {
            warn!(port = config.port, "Port occupied before start, reclaiming");
            if !self
                .ports
                .force_release(config.port, self.settings.release_timeout, true)
                .await
            {
                return Err(Error::PortBusy { port: config.port });
            }
        }

        if let Some(install) = &config.install_command {
            self.install(scene_id, install, &config.project_path).await?;
        }

        let mut child = spawn_dev_command(&config.dev_command, config.port, &config.project_path)?;
        let pid = child.id();
        drain_output(scene_id, &mut child);

        {
            let mut servers = self.servers.lock();
            match servers.get_mut(scene_id) {
                Some(tracked) => {
                    tracked.instance.pid = pid;
                    tracked.child = Some(child);
                }
                None => return Err(stopped_during_startup(scene_id)),
            }
        }

        self.wait_until_ready(scene_id, config).await?;

        let mut servers = self.servers.lock();
        let tracked = servers
            .get_mut(scene_id)
            .ok_or_else(|| stopped_during_startup(scene_id))?;
        transition(&mut tracked.instance, DevServerStatus::Ready)?;
        Ok(tracked.instance.clone())
    }

    async fn install(&self, scene_id: &str, command: &str, project_path: &Path) -> Result<()> {
        info!(scene_id, command, "Installing dependencies");
        let (program, args) = split_command(command)?;

        let output = Command::new(program)
            .args(args)
            .current_dir(project_path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = timeout(self.settings.install_timeout, output)
            .await
            .map_err(|_| Error::InstallFailed {
                path: project_path.to_path_buf(),
                reason: format!("timed out after {}s", self.settings.install_timeout.as_secs()),
            })?
            .map_err(|e| Error::InstallFailed {
                path: project_path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::InstallFailed {
                path: project_path.to_path_buf(),
                reason: format!("{}: {}", output.status, stderr.trim()),
            });
        }
        Ok(())
    }

    /// One deadline covers both phases: the TCP port opening, then an HTTP
    /// probe answering with a status below 400.
    async fn wait_until_ready(&self, scene_id: &str, config: &DevServerConfig) -> Result<()> {
        let url = format!("http://localhost:{}", config.port);
        let deadline = Instant::now() + config.ready_timeout;
        let mut listening = false;

        loop {
            self.check_alive(scene_id)?;

            if !listening {
                listening = self.ports.is_in_use(config.port).await;
                if listening {
                    debug!(scene_id, port = config.port, "Port open, probing HTTP");
                }
            }

            if listening {
                match self.http.head(&url).send().await {
                    Ok(resp) if resp.status().as_u16() < 400 => return Ok(()),
                    Ok(resp) => debug!(scene_id, status = %resp.status(), "Not ready yet"),
                    Err(e) => debug!(scene_id, "Probe failed: {}", e),
                }
            }

            if Instant::now() >= deadline {
                return Err(Error::ReadinessTimeout {
                    url,
                    timeout_ms: config.ready_timeout.as_millis() as u64,
                });
            }
            sleep(config.ready_poll_interval).await;
        }
    }

    fn check_alive(&self, scene_id: &str) -> Result<()> {
        let mut servers = self.servers.lock();
        let child = servers
            .get_mut(scene_id)
            .and_then(|s| s.child.as_mut())
            .ok_or_else(|| stopped_during_startup(scene_id))?;

        match child.try_wait() {
            Ok(Some(status)) => Err(Error::ExitedEarly {
                scene_id: scene_id.to_string(),
                status: status.to_string(),
            }),
            Ok(None) => Ok(()),
            Err(e) => Err(Error::Internal(format!("failed to poll dev server: {}", e))),
        }
    }

    async fn fail(&self, scene_id: &str, port: u16, err: &Error) {
        let child = {
            let mut servers = self.servers.lock();
            servers.get_mut(scene_id).and_then(|tracked| {
                if transition(&mut tracked.instance, DevServerStatus::Error).is_ok() {
                    tracked.instance.error = Some(err.to_string());
                }
                tracked.child.take()
            })
        };

        if let Some(child) = child {
            terminate(child, Duration::ZERO).await;
        }
        self.ports
            .force_release(port, self.settings.release_timeout, true)
            .await;
    }

    /// Stop a scene's dev server. Stopping an unknown scene is a no-op.
    ///
    /// The process group gets SIGTERM, then SIGKILL once the grace period
    /// runs out. The port is always reclaimed and its claim released.
    pub async fn stop(&self, scene_id: &str) -> Option<DevServerInstance> {
        let tracked = self.servers.lock().remove(scene_id)?;
        let TrackedServer {
            mut instance,
            child,
        } = tracked;

        info!(scene_id, port = instance.port, "devserver.stop");

        if let Some(child) = child {
            terminate(child, self.settings.stop_grace).await;
        }

        if !self
            .ports
            .force_release(instance.port, self.settings.release_timeout, true)
            .await
        {
            warn!(scene_id, port = instance.port, "Port still in use after stop");
        }
        self.ports.release_for_scene(scene_id);
        self.ports.release(instance.port);

        if transition(&mut instance, DevServerStatus::Stopped).is_err()
            && instance.status == DevServerStatus::Starting
        {
            instance.error = Some("stopped during startup".to_string());
        }
        Some(instance)
    }

    /// Stop every tracked server concurrently
    pub async fn stop_all(&self) -> Vec<DevServerInstance> {
        let scene_ids: Vec<String> = self.servers.lock().keys().cloned().collect();
        if scene_ids.is_empty() {
            return Vec::new();
        }

        info!(count = scene_ids.len(), "Stopping all dev servers");
        futures::future::join_all(scene_ids.iter().map(|id| self.stop(id)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    pub fn instance(&self, scene_id: &str) -> Option<DevServerInstance> {
        self.servers.lock().get(scene_id).map(|s| s.instance.clone())
    }

    /// Instances currently in `ready`
    pub fn running(&self) -> Vec<DevServerInstance> {
        let mut running: Vec<DevServerInstance> = self
            .servers
            .lock()
            .values()
            .filter(|s| s.instance.status == DevServerStatus::Ready)
            .map(|s| s.instance.clone())
            .collect();
        running.sort_by(|a, b| a.scene_id.cmp(&b.scene_id));
        running
    }

    pub fn len(&self) -> usize {
        self.servers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.lock().is_empty()
    }
}

fn transition(instance: &mut DevServerInstance, next: DevServerStatus) -> Result<()> {
    if !instance.status.can_transition_to(next) {
        return Err(Error::InvalidStateTransition {
            from: instance.status.to_string(),
            to: next.to_string(),
        });
    }
    instance.status = next;
    Ok(())
}

fn stopped_during_startup(scene_id: &str) -> Error {
    Error::Internal(format!("dev server for scene {} was stopped during startup", scene_id))
}

fn split_command(command: &str) -> Result<(&str, Vec<&str>)> {
    let mut parts = command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| Error::InvalidConfig(format!("empty command: {:?}", command)))?;
    Ok((program, parts.collect()))
}

/// Build the argument list for the dev command, forwarding the port.
/// npm needs `--` before arguments meant for the script.
fn dev_args(program: &str, args: &[&str], port: u16) -> Vec<String> {
    let mut full: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    if program == "npm" {
        full.push("--".to_string());
    }
    full.push("--port".to_string());
    full.push(port.to_string());
    full
}

fn spawn_dev_command(command: &str, port: u16, project_path: &Path) -> Result<Child> {
    let (program, args) = split_command(command)?;

    let mut cmd = Command::new(program);
    cmd.args(dev_args(program, &args, port))
        .current_dir(project_path)
        .env("PORT", port.to_string())
        .env("VITE_PORT", port.to_string())
        .env("BROWSER", "none")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Own process group so the whole tree can be signalled at once
    #[cfg(unix)]
    cmd.process_group(0);

    cmd.spawn().map_err(|e| Error::SpawnFailed {
        command: command.to_string(),
        reason: e.to_string(),
    })
}

fn drain_output(scene_id: &str, child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(scene_id.to_string(), "stdout", stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(scene_id.to_string(), "stderr", stderr));
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(scene_id: String, stream: &'static str, reader: R) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(scene_id = %scene_id, stream, "{}", line);
    }
}

/// SIGTERM the process group, wait up to `grace`, then SIGKILL.
async fn terminate(mut child: Child, grace: Duration) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }

    if let Some(pid) = child.id() {
        signal_group(pid, false);
    }
    if !grace.is_zero() && timeout(grace, child.wait()).await.is_ok() {
        return;
    }

    if let Some(pid) = child.id() {
        warn!(pid, "Dev server ignored SIGTERM, sending SIGKILL");
        signal_group(pid, true);
    }
    if let Err(e) = child.start_kill() {
        debug!("start_kill: {}", e);
    }
    let _ = timeout(Duration::from_secs(2), child.wait()).await;
}

#[cfg(unix)]
fn signal_group(pid: u32, force: bool) {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    let pid = Pid::from_raw(pid as i32);
    if killpg(pid, signal).is_err() {
        let _ = kill(pid, signal);
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _force: bool) {}
