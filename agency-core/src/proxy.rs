// ABOUTME: Remote proxy - presents a connected agent as a local runner over its private pipe.
// ABOUTME: Calls write a command, then read frames until the terminal reply, forwarding events on the way.

use agency_agent::transport::{FrameReader, FrameWriter};
use agency_agent::{
    AgentId, Command, EngineResult, EventListener, FramedChannel, Reply, TestFilter, TestPackage,
    TestRunner, TransportError,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::UnixStream;
use tokio::time::Instant;

/// Errors surfaced by calls on a connected agent; all of them leave the run inconclusive
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("agent reported failure: {0}")]
    RemoteFailure(String),

    #[error("agent does not understand command '{0}'")]
    Unrecognized(String),

    #[error("expected a {expected} reply but received {received}")]
    UnexpectedReply {
        expected: &'static str,
        received: &'static str,
    },
}

impl ProxyError {
    /// True when the pipe itself failed rather than the agent answering badly
    pub fn is_transport(&self) -> bool {
        matches!(self, ProxyError::Transport(_))
    }
}

/// Marks a call outstanding for the liveness watchdog while it is alive
struct Outstanding<'a> {
    flag: &'a AtomicBool,
}

impl Drop for Outstanding<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// A connected agent, driven over its private pipe.
///
/// Calls that expect a reply are serialized on the read half: a second call
/// waits until the first has read its terminal reply. Commands without a
/// reply only need the write half, so `stop_run` and `stop` go out even
/// while another task is waiting in [`RemoteAgent::next_event`].
///
/// Lock order is reader, then writer.
pub struct RemoteAgent<S = UnixStream> {
    id: AgentId,
    reader: tokio::sync::Mutex<FrameReader<ReadHalf<S>>>,
    writer: tokio::sync::Mutex<FrameWriter<WriteHalf<S>>>,
    async_listener: Mutex<Option<Arc<dyn EventListener>>>,
    last_frame: Mutex<Instant>,
    outstanding: AtomicBool,
}

impl<S> RemoteAgent<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(id: AgentId, channel: FramedChannel<S>) -> Self {
        let (reader, writer) = channel.into_split();
        Self {
            id,
            reader: tokio::sync::Mutex::new(reader),
            writer: tokio::sync::Mutex::new(writer),
            async_listener: Mutex::new(None),
            last_frame: Mutex::new(Instant::now()),
            outstanding: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    /// How long the outstanding call has gone without a frame, if one is outstanding
    pub fn stalled_for(&self) -> Option<Duration> {
        if !self.outstanding.load(Ordering::SeqCst) {
            return None;
        }
        let last = *self.last_frame.lock().unwrap_or_else(|e| e.into_inner());
        Some(last.elapsed())
    }

    fn touch(&self) {
        *self.last_frame.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn begin_outstanding(&self) -> Outstanding<'_> {
        self.touch();
        self.outstanding.store(true, Ordering::SeqCst);
        Outstanding {
            flag: &self.outstanding,
        }
    }

    fn async_listener(&self) -> Option<Arc<dyn EventListener>> {
        self.async_listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn forward(&self, listener: Option<&dyn EventListener>, report: &str) {
        if let Some(listener) = listener {
            listener.on_event(report);
        } else if let Some(listener) = self.async_listener() {
            listener.on_event(report);
        } else {
            tracing::debug!(agent_id = %self.id, "Dropping event with no listener");
        }
    }

    async fn send(&self, command: &Command) -> Result<(), ProxyError> {
        self.writer.lock().await.write_message(command).await?;
        crate::metrics::record_frame_written(command.name());
        tracing::trace!(agent_id = %self.id, command = command.name(), "Command sent");
        Ok(())
    }

    /// Send a command that has no reply
    async fn post(&self, command: Command) -> Result<(), ProxyError> {
        self.send(&command).await
    }

    /// Send a command and wait for its terminal reply
    async fn call(
        &self,
        command: Command,
        listener: Option<&dyn EventListener>,
    ) -> Result<Reply, ProxyError> {
        let mut reader = self.reader.lock().await;
        self.send(&command).await?;
        let _outstanding = self.begin_outstanding();

        loop {
            let reply: Reply = reader.read_message().await?;
            self.touch();
            match reply {
                Reply::Event { report } => self.forward(listener, &report),
                Reply::Failure { message } => return Err(ProxyError::RemoteFailure(message)),
                Reply::Unrecognized { command } => return Err(ProxyError::Unrecognized(command)),
                terminal => return Ok(terminal),
            }
        }
    }

    /// Bind a runner for `package` inside the agent
    pub async fn create_runner(
        self: &Arc<Self>,
        package: TestPackage,
    ) -> Result<RemoteRunner<S>, ProxyError> {
        self.post(Command::CreateRunner { package }).await?;
        Ok(RemoteRunner {
            agent: Arc::clone(self),
        })
    }

    pub async fn load(&self) -> Result<EngineResult, ProxyError> {
        expect_result(self.call(Command::Load, None).await?)
    }

    pub async fn reload(&self) -> Result<EngineResult, ProxyError> {
        expect_result(self.call(Command::Reload, None).await?)
    }

    pub async fn unload(&self) -> Result<(), ProxyError> {
        self.post(Command::Unload).await
    }

    pub async fn explore(&self, filter: &TestFilter) -> Result<EngineResult, ProxyError> {
        let command = Command::Explore {
            filter: filter.clone(),
        };
        expect_result(self.call(command, None).await?)
    }

    pub async fn count_test_cases(&self, filter: &TestFilter) -> Result<usize, ProxyError> {
        let command = Command::CountTestCases {
            filter: filter.clone(),
        };
        match self.call(command, None).await? {
            Reply::Count { value } => Ok(value),
            other => Err(ProxyError::UnexpectedReply {
                expected: "count",
                received: other.kind(),
            }),
        }
    }

    /// Run to completion, forwarding progress events to `listener`
    pub async fn run(
        &self,
        listener: &dyn EventListener,
        filter: &TestFilter,
    ) -> Result<EngineResult, ProxyError> {
        let command = Command::Run {
            filter: filter.clone(),
        };
        expect_result(self.call(command, Some(listener)).await?)
    }

    /// Start a run and return immediately.
    ///
    /// Events are delivered to `listener` by [`RemoteAgent::next_event`], or by
    /// any later call that reads them off the pipe first.
    pub async fn run_async(
        &self,
        listener: Arc<dyn EventListener>,
        filter: &TestFilter,
    ) -> Result<(), ProxyError> {
        *self
            .async_listener
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(listener);
        self.post(Command::RunAsync {
            filter: filter.clone(),
        })
        .await
    }

    /// Wait for the next event frame and forward it to the run-async listener.
    ///
    /// Not cancel safe: dropping the future mid-frame leaves the pipe unusable.
    pub async fn next_event(&self) -> Result<String, ProxyError> {
        let mut reader = self.reader.lock().await;
        let _outstanding = self.begin_outstanding();

        let reply: Reply = reader.read_message().await?;
        self.touch();
        match reply {
            Reply::Event { report } => {
                self.forward(None, &report);
                Ok(report)
            }
            Reply::Failure { message } => Err(ProxyError::RemoteFailure(message)),
            other => Err(ProxyError::UnexpectedReply {
                expected: "event",
                received: other.kind(),
            }),
        }
    }

    pub async fn stop_run(&self, force: bool) -> Result<(), ProxyError> {
        self.post(Command::StopRun { force }).await
    }

    /// Tell the agent to end its command loop and exit
    pub async fn stop(&self) -> Result<(), ProxyError> {
        tracing::info!(agent_id = %self.id, "Stopping agent");
        self.post(Command::Stop).await
    }
}

fn expect_result(reply: Reply) -> Result<EngineResult, ProxyError> {
    match reply {
        Reply::Result(result) => Ok(result),
        other => Err(ProxyError::UnexpectedReply {
            expected: "result",
            received: other.kind(),
        }),
    }
}

/// Runner bound inside a remote agent, usable anywhere a local runner is
pub struct RemoteRunner<S = UnixStream> {
    agent: Arc<RemoteAgent<S>>,
}

impl<S> RemoteRunner<S> {
    pub fn agent(&self) -> &Arc<RemoteAgent<S>> {
        &self.agent
    }
}

#[async_trait]
impl<S> TestRunner for RemoteRunner<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn load(&mut self) -> anyhow::Result<EngineResult> {
        Ok(self.agent.load().await?)
    }

    async fn reload(&mut self) -> anyhow::Result<EngineResult> {
        Ok(self.agent.reload().await?)
    }

    async fn unload(&mut self) -> anyhow::Result<()> {
        Ok(self.agent.unload().await?)
    }

    async fn explore(&mut self, filter: &TestFilter) -> anyhow::Result<EngineResult> {
        Ok(self.agent.explore(filter).await?)
    }

    async fn count_test_cases(&mut self, filter: &TestFilter) -> anyhow::Result<usize> {
        Ok(self.agent.count_test_cases(filter).await?)
    }

    async fn run(
        &mut self,
        listener: &dyn EventListener,
        filter: &TestFilter,
    ) -> anyhow::Result<EngineResult> {
        Ok(self.agent.run(listener, filter).await?)
    }

    async fn run_async(
        &mut self,
        listener: Arc<dyn EventListener>,
        filter: &TestFilter,
    ) -> anyhow::Result<()> {
        Ok(self.agent.run_async(listener, filter).await?)
    }

    async fn stop_run(&mut self, force: bool) -> anyhow::Result<()> {
        Ok(self.agent.stop_run(force).await?)
    }
}
