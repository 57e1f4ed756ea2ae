// ABOUTME: Agent-side command loop - reads commands off the private pipe and drives the runner.
// ABOUTME: All outgoing frames go through one writer task so events and results stay ordered.

use crate::protocol::{decode_command, Command, Incoming, Reply};
use crate::traits::{EventListener, RunnerFactory, TestRunner};
use crate::transport::framed::{FrameReader, FrameWriter, FramedChannel};
use crate::transport::TransportError;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Process-wide stop event the agent's supervisor waits on
pub type StopSignal = CancellationToken;

/// Why the command loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// A stop command was received
    Stopped,
    /// The agency closed the pipe between frames
    Disconnected,
    /// The stop signal was raised from outside the loop
    Cancelled,
}

/// Listener that turns progress reports into event frames
struct ReplyListener {
    replies: mpsc::UnboundedSender<Reply>,
}

impl EventListener for ReplyListener {
    fn on_event(&self, report: &str) {
        if self.replies.send(Reply::event(report)).is_err() {
            tracing::debug!("Reply writer gone, dropping event");
        }
    }
}

/// Receives commands on an agent's private pipe until told to stop
pub struct CommandLoop<S> {
    reader: FrameReader<ReadHalf<S>>,
    writer: FrameWriter<WriteHalf<S>>,
    factory: RunnerFactory,
    stop: StopSignal,
}

impl<S> CommandLoop<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(channel: FramedChannel<S>, factory: RunnerFactory, stop: StopSignal) -> Self {
        let (reader, writer) = channel.into_split();
        Self {
            reader,
            writer,
            factory,
            stop,
        }
    }

    /// Signal raised when the loop exits for any reason
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Run until a stop command, a closed pipe, or a fatal transport error.
    ///
    /// The stop signal is raised on every exit path.
    pub async fn run(self) -> Result<LoopExit, TransportError> {
        let CommandLoop {
            mut reader,
            writer,
            factory,
            stop,
        } = self;

        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let closing = CancellationToken::new();
        let mut writer_task = tokio::spawn(write_replies(writer, reply_rx, closing.clone()));
        let mut writer_finished = false;

        let mut dispatcher = Dispatcher {
            runner: None,
            factory,
            replies: reply_tx,
        };

        let outcome = loop {
            let body = tokio::select! {
                _ = stop.cancelled() => break Ok(LoopExit::Cancelled),
                written = &mut writer_task => {
                    writer_finished = true;
                    break match flatten_join(written) {
                        Ok(()) => Ok(LoopExit::Disconnected),
                        Err(e) => Err(e),
                    };
                }
                body = reader.read_message::<Value>() => body,
            };

            let body = match body {
                Ok(body) => body,
                Err(e) if e.is_closed() => break Ok(LoopExit::Disconnected),
                Err(e) => break Err(e),
            };

            match decode_command(body) {
                Ok(Incoming::Command(Command::Stop)) => break Ok(LoopExit::Stopped),
                Ok(Incoming::Command(command)) => dispatcher.dispatch(command).await,
                Ok(Incoming::Unrecognized(name)) => {
                    tracing::warn!(command = %name, "Ignoring unrecognized command");
                    dispatcher.send(Reply::Unrecognized { command: name });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Malformed command");
                    dispatcher.send(Reply::Failure {
                        message: format!("malformed command: {}", e),
                    });
                }
            }
        };

        drop(dispatcher);
        closing.cancel();
        if !writer_finished {
            if let Err(e) = flatten_join(writer_task.await) {
                tracing::warn!(error = %e, "Reply writer failed while closing");
            }
        }

        match &outcome {
            Ok(exit) => tracing::info!(?exit, "Command loop finished"),
            Err(e) => tracing::error!(error = %e, "Command loop failed"),
        }
        stop.cancel();
        outcome
    }
}

struct Dispatcher {
    runner: Option<Box<dyn TestRunner>>,
    factory: RunnerFactory,
    replies: mpsc::UnboundedSender<Reply>,
}

impl Dispatcher {
    fn send(&self, reply: Reply) {
        if self.replies.send(reply).is_err() {
            tracing::debug!("Reply writer gone, dropping reply");
        }
    }

    fn listener(&self) -> ReplyListener {
        ReplyListener {
            replies: self.replies.clone(),
        }
    }

    async fn dispatch(&mut self, command: Command) {
        let name = command.name();
        tracing::debug!(command = name, "Dispatching command");

        if let Command::CreateRunner { package } = command {
            let package_name = package.name.clone().unwrap_or_default();
            match (self.factory)(package) {
                Ok(runner) => {
                    tracing::info!(runner = runner.name(), package = %package_name, "Runner created");
                    self.runner = Some(runner);
                }
                Err(e) => tracing::error!(error = %e, "Failed to create runner"),
            }
            return;
        }

        let listener = self.listener();
        let Some(runner) = self.runner.as_mut() else {
            if command.expects_reply() {
                self.send(Reply::Failure {
                    message: format!("no runner bound; '{}' requires create_runner first", name),
                });
            } else {
                tracing::warn!(command = name, "No runner bound, ignoring command");
            }
            return;
        };

        let reply = match command {
            Command::Load => Some(into_reply(runner.load().await.map(Reply::Result))),
            Command::Reload => Some(into_reply(runner.reload().await.map(Reply::Result))),
            Command::Unload => {
                if let Err(e) = runner.unload().await {
                    tracing::warn!(error = %e, "Unload failed");
                }
                None
            }
            Command::Explore { filter } => {
                Some(into_reply(runner.explore(&filter).await.map(Reply::Result)))
            }
            Command::CountTestCases { filter } => Some(into_reply(
                runner
                    .count_test_cases(&filter)
                    .await
                    .map(|value| Reply::Count { value }),
            )),
            Command::Run { filter } => Some(into_reply(
                runner.run(&listener, &filter).await.map(Reply::Result),
            )),
            Command::RunAsync { filter } => {
                match runner.run_async(Arc::new(listener), &filter).await {
                    Ok(()) => None,
                    Err(e) => Some(Reply::Failure {
                        message: format!("{:#}", e),
                    }),
                }
            }
            Command::StopRun { force } => {
                if let Err(e) = runner.stop_run(force).await {
                    tracing::warn!(error = %e, force, "Stop run failed");
                }
                None
            }
            Command::CreateRunner { .. } | Command::Stop => None,
        };

        if let Some(reply) = reply {
            self.send(reply);
        }
    }
}

fn into_reply(result: anyhow::Result<Reply>) -> Reply {
    result.unwrap_or_else(|e| Reply::Failure {
        message: format!("{:#}", e),
    })
}

fn flatten_join(
    joined: Result<Result<(), TransportError>, tokio::task::JoinError>,
) -> Result<(), TransportError> {
    joined.map_err(|e| TransportError::Io(std::io::Error::other(e)))?
}

/// Write queued replies in order; once `closing` fires, drain what is queued and stop
async fn write_replies<W>(
    mut writer: FrameWriter<W>,
    mut replies: mpsc::UnboundedReceiver<Reply>,
    closing: CancellationToken,
) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            reply = replies.recv() => match reply {
                Some(reply) => writer.write_message(&reply).await?,
                None => break,
            },
            _ = closing.cancelled() => {
                while let Ok(reply) = replies.try_recv() {
                    writer.write_message(&reply).await?;
                }
                break;
            }
        }
    }

    let _ = writer.shutdown().await;
    Ok(())
}

/// Spawn a command loop on its own task
pub fn spawn<S>(command_loop: CommandLoop<S>) -> JoinHandle<Result<LoopExit, TransportError>>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    tokio::spawn(command_loop.run())
}
