// ABOUTME: Pipe transport tests over real Unix sockets
// ABOUTME: Covers framed round trips, connect timeouts and the rendezvous handshake

use agency_agent::transport::endpoint::socket_path;
use agency_agent::{
    AgentId, ClientConnection, HandshakeClient, HandshakeServer, ServerConnection, TestPackage,
    TransportError,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;

const TIMEOUT: Duration = Duration::from_secs(5);

fn unique_name(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct NamedCommand {
    name: String,
}

fn nested_package() -> TestPackage {
    let mut top = TestPackage::from_files(["/work/a/first-tests", "/work/b/second-tests"])
        .with_setting("RunAsX86", true)
        .with_setting("InternalTraceLevel", "Debug");

    let mut inner = TestPackage::new("/work/c/third-tests").with_setting("WorkDirectory", "/work");
    inner.add_sub_package(TestPackage::new("/work/c/fourth-tests").with_setting("DebugTests", false));
    top.add_sub_package(inner);
    top
}

#[tokio::test]
async fn test_server_write_is_read_by_client_intact() {
    let name = unique_name("scenario-a");
    let server = ServerConnection::create(&name).unwrap();
    let package = nested_package();

    let expected = package.clone();
    let server_task = tokio::spawn(async move {
        let mut channel = server.wait_for_connection().await.unwrap();
        channel.write_message(&expected).await.unwrap();
        channel
    });

    let mut client = ClientConnection::connect(&name, TIMEOUT).await.unwrap();
    let received: TestPackage = client.read_message().await.unwrap();

    assert_eq!(received, package);
    assert_eq!(received.name, package.name);
    assert_eq!(received.full_name, package.full_name);
    assert_eq!(received.settings, package.settings);
    assert_eq!(received.sub_packages.len(), 3);
    assert_eq!(received.sub_packages[2].sub_packages.len(), 1);
    assert_eq!(
        received.sub_packages[2].sub_packages[0].settings,
        package.sub_packages[2].sub_packages[0].settings
    );

    drop(server_task.await.unwrap());
}

#[tokio::test]
async fn test_six_commands_arrive_in_order() {
    let name = unique_name("scenario-b");
    let server = ServerConnection::create(&name).unwrap();
    let sent: Vec<String> = ["One", "Two", "Three", "Four", "Five", "Six"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let server_task = tokio::spawn(async move {
        let mut channel = server.wait_for_connection().await.unwrap();
        let mut names = Vec::new();
        for _ in 0..6 {
            let command: NamedCommand = channel.read_message().await.unwrap();
            names.push(command.name);
        }
        names
    });

    let mut client = ClientConnection::connect(&name, TIMEOUT).await.unwrap();
    for name in &sent {
        client
            .write_message(&NamedCommand { name: name.clone() })
            .await
            .unwrap();
    }

    let received = server_task.await.unwrap();
    assert_eq!(received, sent);
}

#[tokio::test]
async fn test_connect_times_out_when_server_is_late() {
    let name = unique_name("late");
    let late_name = name.clone();
    let server_task = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        ServerConnection::create(&late_name).unwrap()
    });

    let started = std::time::Instant::now();
    let result = ClientConnection::connect(&name, Duration::from_millis(50)).await;

    match result {
        Err(TransportError::Timeout { name: timed_out, .. }) => assert_eq!(timed_out, name),
        Err(other) => panic!("Expected Timeout, got {:?}", other),
        Ok(_) => panic!("Expected Timeout, got a connection"),
    }
    assert!(started.elapsed() < Duration::from_millis(450));

    drop(server_task.await.unwrap());
}

#[tokio::test]
async fn test_server_endpoint_removed_on_drop() {
    let name = unique_name("dropped");
    let server = ServerConnection::create(&name).unwrap();
    let path = socket_path(&name);
    assert!(path.exists());

    drop(server);
    assert!(!path.exists());
}

#[tokio::test]
async fn test_concurrent_handshakes_get_distinct_pipes() {
    const AGENTS: usize = 8;

    let base = unique_name("agency");
    let server = HandshakeServer::bind(&base).unwrap();
    let shutdown = server.shutdown_token();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let server_task = tokio::spawn(server.run(move |agent| {
        let _ = tx.send(agent);
    }));

    let ids: Vec<AgentId> = (0..AGENTS).map(|_| AgentId::new()).collect();
    let mut clients = Vec::new();
    for id in &ids {
        let client = HandshakeClient::new(base.clone(), *id);
        clients.push(tokio::spawn(async move { client.data_connection().await }));
    }

    let mut connections = Vec::new();
    for client in clients {
        connections.push(client.await.unwrap().unwrap());
    }

    let mut accepted = Vec::new();
    for _ in 0..AGENTS {
        let agent = tokio::time::timeout(TIMEOUT, rx.recv())
            .await
            .unwrap()
            .unwrap();
        accepted.push(agent);
    }

    let names: HashSet<String> = accepted.iter().map(|a| a.pipe_name.clone()).collect();
    let expected: HashSet<String> = (1..=AGENTS).map(|k| format!("{}_{}", base, k)).collect();
    assert_eq!(names, expected);

    let accepted_ids: HashSet<AgentId> = accepted.iter().map(|a| a.id).collect();
    assert_eq!(accepted_ids, ids.into_iter().collect());

    shutdown.cancel();
    server_task.await.unwrap();
    assert!(!socket_path(&base).exists());
    drop(connections);
}

#[tokio::test]
async fn test_private_pipe_carries_traffic_both_ways() {
    let base = unique_name("agency");
    let server = HandshakeServer::bind(&base).unwrap();
    let shutdown = server.shutdown_token();

    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(server.run(move |agent| {
        let _ = tx.send(agent);
    }));

    let id = AgentId::new();
    let mut agent_side = HandshakeClient::new(base.clone(), id)
        .data_connection()
        .await
        .unwrap();
    let mut accepted = rx.recv().await.unwrap();
    assert_eq!(accepted.id, id);
    assert_eq!(accepted.pipe_name, format!("{}_1", base));

    accepted
        .channel
        .write_message(&NamedCommand {
            name: "ping".to_string(),
        })
        .await
        .unwrap();
    let ping: NamedCommand = agent_side.read_message().await.unwrap();
    assert_eq!(ping.name, "ping");

    agent_side
        .write_message(&NamedCommand {
            name: "pong".to_string(),
        })
        .await
        .unwrap();
    let pong: NamedCommand = accepted.channel.read_message().await.unwrap();
    assert_eq!(pong.name, "pong");

    shutdown.cancel();
}

#[tokio::test]
async fn test_silent_rendezvous_client_is_dropped() {
    let base = unique_name("agency");
    let server = HandshakeServer::bind(&base)
        .unwrap()
        .with_identity_timeout(Duration::from_millis(100));
    let shutdown = server.shutdown_token();

    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(server.run(move |agent| {
        let _ = tx.send(agent);
    }));

    // Connects but never sends an id
    let mut silent = ClientConnection::connect(&base, TIMEOUT).await.unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(2), silent.read_message::<String>())
        .await
        .expect("server kept the silent connection open");
    assert!(matches!(outcome, Err(TransportError::Closed)), "got {:?}", outcome);

    // The rendezvous pipe still serves well-behaved agents
    let id = AgentId::new();
    let _connection = HandshakeClient::new(base.clone(), id)
        .data_connection()
        .await
        .unwrap();
    let accepted = tokio::time::timeout(TIMEOUT, rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(accepted.id, id);
    assert_eq!(accepted.pipe_name, format!("{}_1", base));

    shutdown.cancel();
}
