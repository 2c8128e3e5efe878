use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use uibench_common::{DevServerStatus, Error, PortRange};
use uibench_engine::{AllocateOptions, DevServerConfig, DevServerManager, DevServerSettings, PortAllocator};

fn project(dir: &Path) {
    std::fs::write(dir.join("package.json"), r#"{"name": "fixture"}"#).unwrap();
}

fn settings() -> DevServerSettings {
    DevServerSettings {
        stop_grace: Duration::from_millis(500),
        release_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

fn has_python() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .is_ok()
}

/// Live (non-zombie) processes in a process group, read from /proc.
/// `None` where /proc is unavailable.
fn live_group_members(pgid: u32) -> Option<Vec<u32>> {
    let entries = std::fs::read_dir("/proc").ok()?;
    let mut members = Vec::new();
    for entry in entries.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        // pid (comm) state ppid pgrp ...
        let Some(rest) = stat.rfind(')').map(|i| &stat[i + 1..]) else {
            continue;
        };
        let fields: Vec<&str> = rest.split_whitespace().collect();
        if fields.len() < 3 || fields[0] == "Z" {
            continue;
        }
        if fields[2].parse::<u32>().ok() == Some(pgid) {
            members.push(pid);
        }
    }
    Some(members)
}

#[tokio::test]
async fn unready_server_times_out_and_frees_port() {
    let tmp = TempDir::new().unwrap();
    project(tmp.path());
    // Ignores the trailing `--port N` and never binds
    std::fs::write(tmp.path().join("hang.sh"), "sleep 30\n").unwrap();

    let ports = Arc::new(PortAllocator::new(PortRange::new(46000, 46100)));
    let port = ports
        .allocate_for_scene("sleepy", &AllocateOptions::default())
        .await
        .unwrap();
    let manager = DevServerManager::with_settings(ports.clone(), settings()).unwrap();

    let config = DevServerConfig {
        project_path: tmp.path().to_path_buf(),
        port,
        install_command: None,
        dev_command: "sh hang.sh".to_string(),
        ready_timeout: Duration::from_millis(700),
        ready_poll_interval: Duration::from_millis(100),
    };

    let start = Instant::now();
    let err = manager.start("sleepy", &config).await.unwrap_err();
    let elapsed = start.elapsed();
    assert!(
        matches!(err, Error::ReadinessTimeout { timeout_ms: 700, .. }),
        "unexpected error: {}",
        err
    );
    assert!(elapsed >= Duration::from_millis(700));
    assert!(elapsed < Duration::from_secs(10));

    let instance = manager.instance("sleepy").unwrap();
    assert_eq!(instance.status, DevServerStatus::Error);
    assert!(instance.error.is_some());
    assert!(!ports.is_in_use(port).await);

    let pid = instance.pid.unwrap();
    if live_group_members(pid).is_some() {
        // SIGKILL delivery to the grandchild is asynchronous
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut members = live_group_members(pid).unwrap_or_default();
        while !members.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
            members = live_group_members(pid).unwrap_or_default();
        }
        assert!(members.is_empty(), "process group {} still alive: {:?}", pid, members);
    }

    manager.stop_all().await;
    assert!(manager.is_empty());
    assert!(!ports.is_claimed(port));
}

#[tokio::test]
async fn stop_during_startup_aborts_start() {
    let tmp = TempDir::new().unwrap();
    project(tmp.path());
    std::fs::write(tmp.path().join("hang.sh"), "sleep 30\n").unwrap();

    let ports = Arc::new(PortAllocator::new(PortRange::new(46150, 46199)));
    let port = ports
        .allocate_for_scene("interrupted", &AllocateOptions::default())
        .await
        .unwrap();
    let manager = DevServerManager::with_settings(ports.clone(), settings()).unwrap();

    let config = DevServerConfig {
        project_path: tmp.path().to_path_buf(),
        port,
        install_command: None,
        dev_command: "sh hang.sh".to_string(),
        ready_timeout: Duration::from_secs(20),
        ready_poll_interval: Duration::from_millis(50),
    };

    let begin = Instant::now();
    let (started, _) = tokio::join!(manager.start("interrupted", &config), async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        manager.stop_all().await;
    });

    assert!(started.is_err());
    assert!(begin.elapsed() < Duration::from_secs(10));
    assert!(manager.is_empty());
    assert!(!ports.is_claimed(port));
    assert!(!ports.is_in_use(port).await);
}

#[tokio::test]
async fn server_that_exits_fails_fast() {
    let tmp = TempDir::new().unwrap();
    project(tmp.path());

    let ports = Arc::new(PortAllocator::new(PortRange::new(46200, 46300)));
    let port = ports.allocate(&AllocateOptions::default()).await.unwrap();
    let manager = DevServerManager::with_settings(ports, settings()).unwrap();

    let config = DevServerConfig {
        project_path: tmp.path().to_path_buf(),
        port,
        install_command: None,
        dev_command: "false".to_string(),
        ready_timeout: Duration::from_secs(20),
        ready_poll_interval: Duration::from_millis(50),
    };

    let start = Instant::now();
    let err = manager.start("broken", &config).await.unwrap_err();
    assert!(matches!(err, Error::ExitedEarly { .. }), "unexpected error: {}", err);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn failing_install_aborts_start() {
    let tmp = TempDir::new().unwrap();
    project(tmp.path());

    let ports = Arc::new(PortAllocator::new(PortRange::new(46400, 46500)));
    let port = ports.allocate(&AllocateOptions::default()).await.unwrap();
    let manager = DevServerManager::with_settings(ports, settings()).unwrap();

    let config = DevServerConfig {
        project_path: tmp.path().to_path_buf(),
        port,
        install_command: Some("false".to_string()),
        dev_command: "sleep 30".to_string(),
        ready_timeout: Duration::from_secs(5),
        ready_poll_interval: Duration::from_millis(50),
    };

    let err = manager.start("no-install", &config).await.unwrap_err();
    assert!(matches!(err, Error::InstallFailed { .. }), "unexpected error: {}", err);
    assert!(manager.instance("no-install").unwrap().pid.is_none());
}

#[tokio::test]
async fn ready_server_stops_and_releases_port() {
    if !has_python() {
        eprintln!("Skipping: python3 not available in PATH");
        return;
    }

    let tmp = TempDir::new().unwrap();
    project(tmp.path());
    // Serves the directory on the port passed as the trailing `--port N`
    std::fs::write(
        tmp.path().join("server.py"),
        "import sys, http.server, socketserver\n\
         port = int(sys.argv[sys.argv.index('--port') + 1])\n\
         socketserver.TCPServer.allow_reuse_address = True\n\
         with socketserver.TCPServer(('', port), http.server.SimpleHTTPRequestHandler) as httpd:\n\
         \x20   httpd.serve_forever()\n",
    )
    .unwrap();

    let ports = Arc::new(PortAllocator::new(PortRange::new(46600, 46700)));
    let port = ports
        .allocate_for_scene("py", &AllocateOptions::default())
        .await
        .unwrap();
    let manager = DevServerManager::with_settings(ports.clone(), settings()).unwrap();

    let config = DevServerConfig {
        project_path: tmp.path().to_path_buf(),
        port,
        install_command: None,
        dev_command: "python3 server.py".to_string(),
        ready_timeout: Duration::from_secs(15),
        ready_poll_interval: Duration::from_millis(100),
    };

    let instance = manager.start("py", &config).await.unwrap();
    assert_eq!(instance.status, DevServerStatus::Ready);
    assert_eq!(instance.url, format!("http://localhost:{}", port));
    assert!(instance.pid.is_some());
    assert!(ports.is_in_use(port).await);
    assert_eq!(manager.running().len(), 1);

    // Starting a ready scene again is a no-op
    let again = manager.start("py", &config).await.unwrap();
    assert_eq!(again.pid, instance.pid);

    let stopped = manager.stop("py").await.unwrap();
    assert_eq!(stopped.status, DevServerStatus::Stopped);
    assert!(!ports.is_in_use(port).await);
    assert!(!ports.is_claimed(port));
    assert!(manager.stop("py").await.is_none());
}
