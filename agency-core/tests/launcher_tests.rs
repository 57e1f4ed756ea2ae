// ABOUTME: Agent process launcher tests
// ABOUTME: Uses temporary install directories with stand-in agent executables

use agency_agent::package::settings;
use agency_agent::{AgentId, TestPackage};
use agency_core::launcher::agent_exe_path;
use agency_core::{AgentProcess, LaunchError, Runtime, RuntimeFramework};
use std::path::Path;

fn package() -> TestPackage {
    TestPackage::new("/work/tests/suite")
}

#[cfg(unix)]
fn install_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

#[test]
fn test_default_command_line() {
    let install = tempfile::tempdir().unwrap();
    let id = AgentId::new();
    let process = AgentProcess::new(install.path(), "TestAgency_abc", &package(), id).unwrap();

    assert_eq!(process.target_runtime().runtime, Runtime::Native);
    assert_eq!(process.agent_exe_path(), install.path().join("agency-agent"));
    assert_eq!(
        process.agent_args(),
        &[
            id.to_string(),
            "TestAgency_abc".to_string(),
            format!("--pid={}", std::process::id()),
        ]
    );

    let (program, args) = process.command_line();
    assert_eq!(program, install.path().join("agency-agent"));
    assert_eq!(args, process.agent_args());
}

#[test]
fn test_optional_flags_only_when_not_default() {
    let install = tempfile::tempdir().unwrap();
    let package = package()
        .with_setting(settings::INTERNAL_TRACE_LEVEL, "Debug")
        .with_setting(settings::DEBUG_AGENT, true)
        .with_setting(settings::WORK_DIRECTORY, "/tmp/work");

    let process = AgentProcess::new(install.path(), "agency", &package, AgentId::new()).unwrap();
    let args = process.agent_args();
    assert!(args.contains(&"--trace=Debug".to_string()));
    assert!(args.contains(&"--debug-agent".to_string()));
    assert!(args.contains(&"--work=/tmp/work".to_string()));

    let quiet = self::package()
        .with_setting(settings::INTERNAL_TRACE_LEVEL, "Off")
        .with_setting(settings::DEBUG_AGENT, false);
    let process = AgentProcess::new(install.path(), "agency", &quiet, AgentId::new()).unwrap();
    assert_eq!(process.agent_args().len(), 3);
}

#[test]
fn test_exe_paths_by_runtime() {
    let install = Path::new("/opt/agency");
    let path = |setting: &str, x86: bool| {
        agent_exe_path(install, &RuntimeFramework::parse(setting).unwrap(), x86).unwrap()
    };

    assert_eq!(path("", true), install.join("agency-agent-x86"));
    assert_eq!(path("net-4.5", false), install.join("agents/net20/agency-agent.exe"));
    assert_eq!(
        path("netcore-1.1", false),
        install.join("agents/netcoreapp1.1/agency-agent.dll")
    );
    assert_eq!(
        path("netcore-2.1", true),
        install.join("agents/netcoreapp2.1/agency-agent-x86.dll")
    );
    assert_eq!(path("mono-4.0", false), install.join("agents/net20/agency-agent.exe"));
}

#[test]
fn test_unsupported_netcore_version() {
    let err = agent_exe_path(
        Path::new("/opt/agency"),
        &RuntimeFramework::parse("netcore-3.1").unwrap(),
        false,
    )
    .unwrap_err();
    assert!(matches!(err, LaunchError::UnsupportedRuntime(_)));
}

#[test]
fn test_invalid_runtime_setting() {
    let package = package().with_setting(settings::RUNTIME_FRAMEWORK, "cobol-85");
    let err = AgentProcess::new(Path::new("/opt"), "agency", &package, AgentId::new()).unwrap_err();
    assert!(matches!(err, LaunchError::InvalidRuntime { .. }));
}

#[test]
fn test_mono_command_line() {
    let package = package()
        .with_setting(settings::RUNTIME_FRAMEWORK, "mono-4.0")
        .with_setting(settings::DEBUG_TESTS, true);
    let process = AgentProcess::new(Path::new("/opt"), "agency", &package, AgentId::new()).unwrap();

    let (program, args) = process.command_line();
    assert_eq!(program, Path::new("mono"));
    assert_eq!(args[0], "--runtime=v4.0.30319");
    assert_eq!(args[1], "--debug");
    assert_eq!(args[2], "/opt/agents/net20/agency-agent.exe");
    assert_eq!(&args[3..], process.agent_args());
}

#[test]
fn test_netcore_command_line() {
    let package = package().with_setting(settings::RUNTIME_FRAMEWORK, "netcore-2.1");
    let process = AgentProcess::new(Path::new("/opt"), "agency", &package, AgentId::new()).unwrap();

    let (program, args) = process.command_line();
    assert_eq!(program, Path::new("dotnet"));
    assert_eq!(args[0], "/opt/agents/netcoreapp2.1/agency-agent.dll");
}

#[tokio::test]
async fn test_launch_fails_fast_when_agent_missing() {
    let install = tempfile::tempdir().unwrap();
    let process = AgentProcess::new(install.path(), "agency", &package(), AgentId::new()).unwrap();

    match process.launch() {
        Err(LaunchError::AgentNotFound(path)) => {
            assert_eq!(path, install.path().join("agency-agent"))
        }
        other => panic!("Expected AgentNotFound, got {:?}", other.map(|_| ())),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_launch_passes_agent_args() {
    let install = tempfile::tempdir().unwrap();
    let out = install.path().join("args.txt");
    install_script(
        &install.path().join("agency-agent"),
        &format!("echo \"$@\" > {}", out.display()),
    );

    let id = AgentId::new();
    let process = AgentProcess::new(install.path(), "agency_x", &package(), id).unwrap();
    let mut child = process.launch().unwrap();
    assert!(child.wait().await.unwrap().success());

    let recorded = std::fs::read_to_string(&out).unwrap();
    assert_eq!(
        recorded.trim(),
        format!("{} agency_x --pid={}", id, std::process::id())
    );
}
