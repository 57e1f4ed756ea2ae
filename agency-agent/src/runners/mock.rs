// ABOUTME: Mock runner for testing - returns pre-configured results and records every call.
// ABOUTME: Allows deterministic command loop and proxy tests without spawning test executables.
//!
//! # Example
//!
//! ```no_run
//! use agency_agent::runners::{MockRunner, RunnerCall};
//! use agency_agent::EngineResult;
//!
//! let mock = MockRunner::new()
//!     .on_load(EngineResult::new("<test-suite/>"))
//!     .emit_events(["<start-test/>", "<test-case/>"])
//!     .on_run(EngineResult::new("<test-run/>"));
//!
//! let calls = mock.call_log();
//! let factory = mock.factory();
//! // hand `factory` to a CommandLoop, drive it, then inspect `calls`
//! # let _ = (calls, factory);
//! ```

use crate::package::{EngineResult, TestFilter, TestPackage};
use crate::traits::{EventListener, RunnerFactory, TestRunner};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One invocation observed by a [`MockRunner`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerCall {
    Create(Option<String>),
    Load,
    Reload,
    Unload,
    Explore(String),
    CountTestCases(String),
    Run(String),
    RunAsync(String),
    StopRun(bool),
}

/// Shared record of calls, readable after the runner has been moved into a loop
pub type CallLog = Arc<Mutex<Vec<RunnerCall>>>;

/// Mock runner for testing
#[derive(Clone)]
pub struct MockRunner {
    load_result: EngineResult,
    explore_result: EngineResult,
    count: usize,
    run_events: Vec<String>,
    run_result: EngineResult,
    event_delay: Option<Duration>,
    failure: Option<String>,
    calls: CallLog,
}

impl MockRunner {
    /// Create a mock that answers every call with empty results
    pub fn new() -> Self {
        Self {
            load_result: EngineResult::default(),
            explore_result: EngineResult::default(),
            count: 0,
            run_events: Vec::new(),
            run_result: EngineResult::default(),
            event_delay: None,
            failure: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Result returned by load and reload
    pub fn on_load(mut self, result: EngineResult) -> Self {
        self.load_result = result;
        self
    }

    pub fn on_explore(mut self, result: EngineResult) -> Self {
        self.explore_result = result;
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    /// Progress reports emitted by run and run_async, in order
    pub fn emit_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_events = events.into_iter().map(Into::into).collect();
        self
    }

    /// Result returned by run; run_async reports it as its final event
    pub fn on_run(mut self, result: EngineResult) -> Self {
        self.run_result = result;
        self
    }

    /// Pause between asynchronous events so a stop_run can land mid-run
    pub fn with_event_delay(mut self, delay: Duration) -> Self {
        self.event_delay = Some(delay);
        self
    }

    /// Make every replying call fail with `message`
    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    /// Handle on the calls this runner (and every clone the factory makes) receives
    pub fn call_log(&self) -> CallLog {
        Arc::clone(&self.calls)
    }

    /// Factory handing out clones of this mock
    pub fn factory(self) -> RunnerFactory {
        Box::new(move |package: TestPackage| {
            let runner = self.clone();
            runner.record(RunnerCall::Create(package.name.clone()));
            Ok(Box::new(runner) as Box<dyn TestRunner>)
        })
    }

    fn record(&self, call: RunnerCall) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }

    fn check_failure(&self) -> Result<()> {
        if let Some(message) = &self.failure {
            bail!("{}", message);
        }
        Ok(())
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TestRunner for MockRunner {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn load(&mut self) -> Result<EngineResult> {
        self.record(RunnerCall::Load);
        self.check_failure()?;
        Ok(self.load_result.clone())
    }

    async fn reload(&mut self) -> Result<EngineResult> {
        self.record(RunnerCall::Reload);
        self.check_failure()?;
        Ok(self.load_result.clone())
    }

    async fn unload(&mut self) -> Result<()> {
        self.record(RunnerCall::Unload);
        Ok(())
    }

    async fn explore(&mut self, filter: &TestFilter) -> Result<EngineResult> {
        self.record(RunnerCall::Explore(filter.as_str().to_string()));
        self.check_failure()?;
        Ok(self.explore_result.clone())
    }

    async fn count_test_cases(&mut self, filter: &TestFilter) -> Result<usize> {
        self.record(RunnerCall::CountTestCases(filter.as_str().to_string()));
        self.check_failure()?;
        Ok(self.count)
    }

    async fn run(
        &mut self,
        listener: &dyn EventListener,
        filter: &TestFilter,
    ) -> Result<EngineResult> {
        self.record(RunnerCall::Run(filter.as_str().to_string()));
        self.check_failure()?;
        for event in &self.run_events {
            listener.on_event(event);
        }
        Ok(self.run_result.clone())
    }

    async fn run_async(
        &mut self,
        listener: Arc<dyn EventListener>,
        filter: &TestFilter,
    ) -> Result<()> {
        self.record(RunnerCall::RunAsync(filter.as_str().to_string()));
        self.check_failure()?;

        let events = self.run_events.clone();
        let summary = self.run_result.nodes.concat();
        let delay = self.event_delay;
        tokio::spawn(async move {
            for event in events {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                listener.on_event(&event);
            }
            listener.on_event(&summary);
        });
        Ok(())
    }

    async fn stop_run(&mut self, force: bool) -> Result<()> {
        self.record(RunnerCall::StopRun(force));
        Ok(())
    }
}
