// ABOUTME: TestRunner trait every runner implements, local or remote, plus the event listener.
// ABOUTME: The command loop drives a TestRunner; the agency's remote runner implements the same trait.

use crate::package::{EngineResult, TestFilter, TestPackage};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Receives free-form progress reports while a run is outstanding
pub trait EventListener: Send + Sync {
    fn on_event(&self, report: &str);
}

impl<F> EventListener for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_event(&self, report: &str) {
        self(report)
    }
}

/// Test-execution engine driven on behalf of an agent's commands
#[async_trait]
pub trait TestRunner: Send {
    /// Runner name for logging
    fn name(&self) -> &'static str;

    async fn load(&mut self) -> Result<EngineResult>;

    async fn reload(&mut self) -> Result<EngineResult>;

    async fn unload(&mut self) -> Result<()>;

    async fn explore(&mut self, filter: &TestFilter) -> Result<EngineResult>;

    async fn count_test_cases(&mut self, filter: &TestFilter) -> Result<usize>;

    /// Run to completion, reporting progress to `listener` before returning the result
    async fn run(&mut self, listener: &dyn EventListener, filter: &TestFilter)
        -> Result<EngineResult>;

    /// Start a run without waiting for it.
    ///
    /// Completion is reported only through `listener`.
    async fn run_async(
        &mut self,
        listener: Arc<dyn EventListener>,
        filter: &TestFilter,
    ) -> Result<()>;

    async fn stop_run(&mut self, force: bool) -> Result<()>;
}

/// Factory that binds a runner to the package named by a create-runner command
pub type RunnerFactory = Box<dyn Fn(TestPackage) -> Result<Box<dyn TestRunner>> + Send + Sync>;
