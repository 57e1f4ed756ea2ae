use agency_agent::runners::{MockRunner, RunnerCall};
use agency_agent::{
    Command, CommandLoop, EngineResult, FramedChannel, LoopExit, Reply, StopSignal, TestFilter,
    TestPackage,
};
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;

type LoopTask = JoinHandle<Result<LoopExit, agency_agent::TransportError>>;

fn start_loop(mock: MockRunner) -> (FramedChannel<DuplexStream>, StopSignal, LoopTask) {
    let (agency_side, agent_side) = tokio::io::duplex(64 * 1024);
    let stop = StopSignal::new();
    let command_loop = CommandLoop::new(FramedChannel::new(agent_side), mock.factory(), stop.clone());
    let task = tokio::spawn(command_loop.run());
    (FramedChannel::new(agency_side), stop, task)
}

async fn send(channel: &mut FramedChannel<DuplexStream>, command: Command) {
    channel.write_message(&command).await.unwrap();
}

async fn recv(channel: &mut FramedChannel<DuplexStream>) -> Reply {
    tokio::time::timeout(Duration::from_secs(5), channel.read_message::<Reply>())
        .await
        .expect("reply timed out")
        .unwrap()
}

fn create_runner() -> Command {
    Command::CreateRunner {
        package: TestPackage::new("/work/mock-tests"),
    }
}

#[tokio::test]
async fn test_create_load_run_stop_sequence() {
    let mock = MockRunner::new()
        .on_load(EngineResult::new("<test-suite/>"))
        .emit_events(["<start-test/>", "<test-case/>"])
        .on_run(EngineResult::new("<test-run/>"));
    let calls = mock.call_log();
    let (mut channel, stop, task) = start_loop(mock);

    send(&mut channel, create_runner()).await;
    send(&mut channel, Command::Load).await;
    send(
        &mut channel,
        Command::Run {
            filter: TestFilter::new("smoke"),
        },
    )
    .await;
    send(&mut channel, Command::Stop).await;

    assert_eq!(
        recv(&mut channel).await,
        Reply::Result(EngineResult::new("<test-suite/>"))
    );
    assert_eq!(recv(&mut channel).await, Reply::event("<start-test/>"));
    assert_eq!(recv(&mut channel).await, Reply::event("<test-case/>"));
    assert_eq!(
        recv(&mut channel).await,
        Reply::Result(EngineResult::new("<test-run/>"))
    );

    let after_stop = channel.read_frame().await.unwrap_err();
    assert!(after_stop.is_closed());

    assert_eq!(task.await.unwrap().unwrap(), LoopExit::Stopped);
    assert!(stop.is_cancelled());
    assert_eq!(
        *calls.lock().unwrap(),
        vec![
            RunnerCall::Create(Some("mock-tests".to_string())),
            RunnerCall::Load,
            RunnerCall::Run("smoke".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_count_and_explore_replies() {
    let mock = MockRunner::new()
        .with_count(42)
        .on_explore(EngineResult::from_nodes(vec!["a".into(), "b".into()]));
    let (mut channel, _stop, _task) = start_loop(mock);

    send(&mut channel, create_runner()).await;
    send(
        &mut channel,
        Command::CountTestCases {
            filter: TestFilter::empty(),
        },
    )
    .await;
    send(
        &mut channel,
        Command::Explore {
            filter: TestFilter::empty(),
        },
    )
    .await;

    assert_eq!(recv(&mut channel).await, Reply::Count { value: 42 });
    match recv(&mut channel).await {
        Reply::Result(result) => assert_eq!(result.nodes, vec!["a", "b"]),
        other => panic!("Expected Result, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_opcode_is_reported_and_loop_continues() {
    let mock = MockRunner::new().on_load(EngineResult::new("<loaded/>"));
    let (mut channel, _stop, _task) = start_loop(mock);

    channel
        .write_frame(br#"{"v":1,"msg":{"command":"defragment","level":3}}"#)
        .await
        .unwrap();
    assert_eq!(
        recv(&mut channel).await,
        Reply::Unrecognized {
            command: "defragment".to_string()
        }
    );

    send(&mut channel, create_runner()).await;
    send(&mut channel, Command::Load).await;
    assert_eq!(
        recv(&mut channel).await,
        Reply::Result(EngineResult::new("<loaded/>"))
    );
}

#[tokio::test]
async fn test_replying_command_without_runner_fails() {
    let (mut channel, _stop, task) = start_loop(MockRunner::new());

    send(&mut channel, Command::Unload).await;
    send(&mut channel, Command::Load).await;

    match recv(&mut channel).await {
        Reply::Failure { message } => assert!(message.contains("create_runner")),
        other => panic!("Expected Failure, got {:?}", other),
    }

    send(&mut channel, Command::Stop).await;
    assert_eq!(task.await.unwrap().unwrap(), LoopExit::Stopped);
}

#[tokio::test]
async fn test_runner_error_becomes_failure_reply() {
    let mock = MockRunner::new().failing("assembly could not be loaded");
    let (mut channel, _stop, _task) = start_loop(mock);

    send(&mut channel, create_runner()).await;
    send(&mut channel, Command::Load).await;

    assert_eq!(
        recv(&mut channel).await,
        Reply::Failure {
            message: "assembly could not be loaded".to_string()
        }
    );
}

#[tokio::test]
async fn test_run_async_streams_events_without_result() {
    let mock = MockRunner::new()
        .emit_events(["first", "second"])
        .on_run(EngineResult::new("<summary/>"))
        .with_event_delay(Duration::from_millis(5));
    let calls = mock.call_log();
    let (mut channel, _stop, _task) = start_loop(mock);

    send(&mut channel, create_runner()).await;
    send(
        &mut channel,
        Command::RunAsync {
            filter: TestFilter::empty(),
        },
    )
    .await;

    assert_eq!(recv(&mut channel).await, Reply::event("first"));
    assert_eq!(recv(&mut channel).await, Reply::event("second"));
    assert_eq!(recv(&mut channel).await, Reply::event("<summary/>"));

    send(&mut channel, Command::StopRun { force: true }).await;
    send(&mut channel, Command::Reload).await;
    assert!(matches!(recv(&mut channel).await, Reply::Result(_)));

    let calls = calls.lock().unwrap().clone();
    assert!(calls.contains(&RunnerCall::RunAsync(String::new())));
    assert!(calls.contains(&RunnerCall::StopRun(true)));
}

#[tokio::test]
async fn test_agency_disconnect_ends_loop() {
    let (channel, stop, task) = start_loop(MockRunner::new());
    drop(channel);

    assert_eq!(task.await.unwrap().unwrap(), LoopExit::Disconnected);
    assert!(stop.is_cancelled());
}

#[tokio::test]
async fn test_external_stop_signal_ends_loop() {
    let (_channel, stop, task) = start_loop(MockRunner::new());
    stop.cancel();

    assert_eq!(task.await.unwrap().unwrap(), LoopExit::Cancelled);
}
