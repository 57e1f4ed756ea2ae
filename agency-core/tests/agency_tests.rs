// ABOUTME: Agency start-up failure tests using shell scripts as stand-in agents
// ABOUTME: Scripts never handshake, so these cover the exit, timeout and missing-agent paths

use agency_agent::TestPackage;
use agency_core::{Agency, AgencyConfig, AgentStatus, LaunchError, StartError};
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;

fn config(install_dir: &Path, startup_timeout_secs: u64) -> AgencyConfig {
    AgencyConfig {
        name: format!("agency_{}", uuid::Uuid::new_v4().simple()),
        install_dir: install_dir.to_path_buf(),
        startup_timeout_secs,
        liveness_timeout_secs: None,
    }
}

#[cfg(unix)]
fn install_agent_script(install_dir: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;
    let path = install_dir.join("agency-agent");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

#[tokio::test]
async fn test_start_binds_connection_point() {
    let install = tempfile::tempdir().unwrap();
    let config = config(install.path(), 5);
    let name = config.name.clone();

    let mut agency = Agency::start(config).unwrap();
    assert!(agency.connection_point().starts_with(&format!("{}_", name)));
    assert!(agency.store().is_empty());
    agency.stop().await;
}

#[tokio::test]
async fn test_missing_agent_fails_without_a_record() {
    let install = tempfile::tempdir().unwrap();
    let agency = Agency::start(config(install.path(), 5)).unwrap();

    let err = agency
        .get_agent(&TestPackage::new("/suite"))
        .await
        .err().unwrap();
    assert!(matches!(
        err,
        StartError::Launch(LaunchError::AgentNotFound(_))
    ));
    assert!(agency.store().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_agent_exiting_before_handshake() {
    let install = tempfile::tempdir().unwrap();
    install_agent_script(install.path(), "exit 3");
    let agency = Agency::start(config(install.path(), 10)).unwrap();

    let started = Instant::now();
    let err = agency
        .get_agent(&TestPackage::new("/suite"))
        .await
        .err().unwrap();

    let StartError::AgentExited(id) = err else {
        panic!("Expected AgentExited, got {:?}", err);
    };
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(agency.store().status(id), Some(AgentStatus::Terminated));
}

#[cfg(unix)]
#[tokio::test]
async fn test_silent_agent_times_out_and_is_killed() {
    let install = tempfile::tempdir().unwrap();
    install_agent_script(install.path(), "sleep 30");
    let agency = Agency::start(config(install.path(), 1)).unwrap();

    let err = agency
        .get_agent(&TestPackage::new("/suite"))
        .await
        .err().unwrap();
    let StartError::StartupTimeout { id, timeout } = err else {
        panic!("Expected StartupTimeout, got {:?}", err);
    };
    assert_eq!(timeout, Duration::from_secs(1));

    let deadline = Instant::now() + Duration::from_secs(5);
    while agency.store().status(id) != Some(AgentStatus::Terminated) {
        assert!(Instant::now() < deadline, "timed out agent was never reaped");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_killed_starting_agent_fails_start() {
    let install = tempfile::tempdir().unwrap();
    install_agent_script(install.path(), "sleep 30");
    let agency = std::sync::Arc::new(tokio::sync::Mutex::new(
        Agency::start(config(install.path(), 30)).unwrap(),
    ));

    let store = std::sync::Arc::clone(agency.lock().await.store());
    let pending = {
        let agency = std::sync::Arc::clone(&agency);
        tokio::spawn(async move {
            let agency = agency.lock().await;
            agency.get_agent(&TestPackage::new("/suite")).await.map(|_| ())
        })
    };

    let deadline = Instant::now() + Duration::from_secs(5);
    while store.active_processes().is_empty() {
        assert!(Instant::now() < deadline, "agent was never launched");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // Killing the process makes the pending start fail fast
    for (_, process) in store.active_processes() {
        process.kill();
    }
    let result = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(StartError::AgentExited(_))));

    agency.lock().await.stop().await;
    assert!(store.active_processes().is_empty());
}

#[tokio::test]
async fn test_release_unknown_agent_is_harmless() {
    let install = tempfile::tempdir().unwrap();
    let agency = Agency::start(config(install.path(), 5)).unwrap();
    agency.release_agent(agency_agent::AgentId::new()).await;
}
