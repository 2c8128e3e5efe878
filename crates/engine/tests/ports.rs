use std::collections::BTreeSet;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uibench_common::PortRange;
use uibench_engine::{AllocateOptions, PortAllocator};

#[tokio::test]
async fn repeated_allocations_are_distinct() {
    let allocator = PortAllocator::new(PortRange::new(45000, 45200));
    let mut ports = BTreeSet::new();
    for _ in 0..20 {
        let port = allocator.allocate(&AllocateOptions::default()).await.unwrap();
        assert!(ports.insert(port));
    }
    assert_eq!(allocator.allocated_ports().len(), 20);
}

#[tokio::test]
async fn concurrent_allocations_are_distinct() {
    let allocator = Arc::new(PortAllocator::new(PortRange::new(45300, 45400)));
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let allocator = allocator.clone();
            tokio::spawn(async move { allocator.allocate(&AllocateOptions::default()).await })
        })
        .collect();

    let mut ports = BTreeSet::new();
    for handle in handles {
        let port = handle.await.unwrap().unwrap();
        assert!(ports.insert(port), "port {} allocated twice", port);
    }
}

#[tokio::test]
async fn released_port_can_be_reused() {
    let allocator = PortAllocator::new(PortRange::new(45500, 45501));
    let first = allocator.allocate(&AllocateOptions::default()).await.unwrap();
    let second = allocator.allocate(&AllocateOptions::default()).await.unwrap();
    assert_ne!(first, second);
    assert!(allocator.allocate(&AllocateOptions::default()).await.is_err());

    allocator.release(first);
    assert_eq!(
        allocator.allocate(&AllocateOptions::default()).await.unwrap(),
        first
    );
}

#[tokio::test]
async fn force_release_of_free_port_returns_immediately() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let allocator = PortAllocator::default();
    assert!(!allocator.is_in_use(port).await);

    let start = Instant::now();
    assert!(allocator.force_release(port, Duration::from_secs(10), true).await);
    assert!(start.elapsed() < Duration::from_millis(900));
}

#[tokio::test]
async fn force_release_kills_foreign_listener() {
    if std::process::Command::new("python3").arg("--version").output().is_err() {
        eprintln!("Skipping: python3 not available in PATH");
        return;
    }
    if std::process::Command::new("lsof").arg("-v").output().is_err()
        && std::process::Command::new("fuser").arg("-V").output().is_err()
    {
        eprintln!("Skipping: neither lsof nor fuser available");
        return;
    }

    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let mut child = std::process::Command::new("python3")
        .args([
            "-c",
            &format!(
                "import socket,time\ns=socket.socket()\ns.setsockopt(socket.SOL_SOCKET,socket.SO_REUSEADDR,1)\ns.bind(('127.0.0.1',{}))\ns.listen()\ntime.sleep(60)",
                port
            ),
        ])
        .spawn()
        .unwrap();

    let allocator = PortAllocator::default();
    if !allocator.wait_until_ready(port, Duration::from_secs(5)).await {
        let _ = child.kill();
        panic!("listener never came up on {}", port);
    }

    let released = allocator.force_release(port, Duration::from_secs(5), true).await;
    let _ = child.kill();
    let _ = child.wait();
    assert!(released);
    assert!(!allocator.is_in_use(port).await);
}
