// ABOUTME: Process runner - drives test executables that follow the libtest command-line convention.
// ABOUTME: Lists with `--list`, runs with an optional filter and streams stdout lines as events.

use crate::package::{EngineResult, TestFilter, TestPackage};
use crate::traits::{EventListener, RunnerFactory, TestRunner};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command as ProcessCommand;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Suffix libtest puts after every test name in `--list` output
const TEST_SUFFIX: &str = ": test";

/// Cancellation handles for a run started with run_async
struct ActiveRun {
    /// Skip executables that have not started yet
    stop: CancellationToken,
    /// Kill the executable that is running now
    kill: CancellationToken,
    task: JoinHandle<()>,
}

pub struct ProcessRunner {
    package: TestPackage,
    files: Vec<PathBuf>,
    loaded: bool,
    active: Option<ActiveRun>,
}

impl ProcessRunner {
    pub fn new(package: TestPackage) -> Self {
        let files = package.files();
        Self {
            package,
            files,
            loaded: false,
            active: None,
        }
    }

    /// Factory function for the agent's command loop
    pub fn factory() -> RunnerFactory {
        Box::new(|package| Ok(Box::new(ProcessRunner::new(package)) as Box<dyn TestRunner>))
    }

    fn check_files(&self) -> Result<EngineResult> {
        if self.files.is_empty() {
            bail!("package {} contains no test files", self.package.id);
        }
        for file in &self.files {
            if !file.is_file() {
                bail!("test file not found: {}", file.display());
            }
        }
        Ok(EngineResult::from_nodes(
            self.files
                .iter()
                .map(|f| f.display().to_string())
                .collect(),
        ))
    }

    async fn ensure_loaded(&mut self) -> Result<()> {
        if !self.loaded {
            self.load().await?;
        }
        Ok(())
    }

    async fn list_tests(&self, filter: &TestFilter) -> Result<Vec<String>> {
        let mut tests = Vec::new();
        for file in &self.files {
            let mut args = vec!["--list".to_string()];
            if !filter.is_empty() {
                args.push(filter.as_str().to_string());
            }

            let output = ProcessCommand::new(file)
                .args(&args)
                .stdin(Stdio::null())
                .stderr(Stdio::null())
                .output()
                .await
                .with_context(|| format!("Failed to list tests in {}", file.display()))?;
            if !output.status.success() {
                bail!(
                    "{} --list exited with status {:?}",
                    file.display(),
                    output.status.code()
                );
            }

            let stdout = String::from_utf8_lossy(&output.stdout);
            tests.extend(parse_test_list(&stdout));
        }
        Ok(tests)
    }

    fn cancel_active(&mut self, force: bool) {
        if let Some(active) = self.active.take() {
            active.stop.cancel();
            if force {
                active.kill.cancel();
            } else if !active.task.is_finished() {
                // Let the current executable finish; keep the handles for a later forced stop
                self.active = Some(active);
            }
        }
    }
}

#[async_trait]
impl TestRunner for ProcessRunner {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn load(&mut self) -> Result<EngineResult> {
        let result = self.check_files()?;
        self.loaded = true;
        tracing::info!(files = self.files.len(), "Test package loaded");
        Ok(result)
    }

    async fn reload(&mut self) -> Result<EngineResult> {
        self.loaded = false;
        self.load().await
    }

    async fn unload(&mut self) -> Result<()> {
        self.cancel_active(true);
        self.loaded = false;
        Ok(())
    }

    async fn explore(&mut self, filter: &TestFilter) -> Result<EngineResult> {
        self.ensure_loaded().await?;
        Ok(EngineResult::from_nodes(self.list_tests(filter).await?))
    }

    async fn count_test_cases(&mut self, filter: &TestFilter) -> Result<usize> {
        self.ensure_loaded().await?;
        Ok(self.list_tests(filter).await?.len())
    }

    async fn run(
        &mut self,
        listener: &dyn EventListener,
        filter: &TestFilter,
    ) -> Result<EngineResult> {
        self.ensure_loaded().await?;
        run_files(&self.files, filter, listener, &CancellationToken::new()).await
    }

    async fn run_async(
        &mut self,
        listener: Arc<dyn EventListener>,
        filter: &TestFilter,
    ) -> Result<()> {
        self.ensure_loaded().await?;
        self.cancel_active(true);

        let stop = CancellationToken::new();
        let kill = CancellationToken::new();
        let files = self.files.clone();
        let filter = filter.clone();
        let task = tokio::spawn({
            let stop = stop.clone();
            let kill = kill.clone();
            async move {
                let outcome = tokio::select! {
                    _ = kill.cancelled() => Err(anyhow::anyhow!("run cancelled")),
                    result = run_files(&files, &filter, listener.as_ref(), &stop) => result,
                };
                match outcome {
                    Ok(result) => listener.on_event(&result.nodes.join("\n")),
                    Err(e) => {
                        tracing::warn!(error = %e, "Asynchronous run ended early");
                        listener.on_event(&format!("run aborted: {}", e));
                    }
                }
            }
        });

        self.active = Some(ActiveRun { stop, kill, task });
        Ok(())
    }

    async fn stop_run(&mut self, force: bool) -> Result<()> {
        tracing::info!(force, "Stopping run");
        self.cancel_active(force);
        Ok(())
    }
}

impl Drop for ProcessRunner {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.kill.cancel();
            active.task.abort();
        }
    }
}

/// Run every executable in turn, reporting each stdout line; `stop` skips the rest
async fn run_files(
    files: &[PathBuf],
    filter: &TestFilter,
    listener: &dyn EventListener,
    stop: &CancellationToken,
) -> Result<EngineResult> {
    let mut nodes = Vec::with_capacity(files.len());
    for file in files {
        if stop.is_cancelled() {
            nodes.push(format!("{}: skipped", file.display()));
            continue;
        }
        let status = run_file(file, filter, listener).await?;
        nodes.push(format!("{}: {}", file.display(), status));
    }
    Ok(EngineResult::from_nodes(nodes))
}

async fn run_file(
    file: &Path,
    filter: &TestFilter,
    listener: &dyn EventListener,
) -> Result<std::process::ExitStatus> {
    let mut command = ProcessCommand::new(file);
    if !filter.is_empty() {
        command.arg(filter.as_str());
    }

    tracing::debug!(file = %file.display(), filter = filter.as_str(), "Spawning test executable");
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn {}", file.display()))?;

    let stdout = child.stdout.take().context("Failed to capture stdout")?;
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    // Test output is not guaranteed to be UTF-8
    while reader.read_until(b'\n', &mut buf).await? > 0 {
        let line = buf
            .strip_suffix(b"\n")
            .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
            .unwrap_or(&buf[..]);
        if !line.is_empty() {
            listener.on_event(&String::from_utf8_lossy(line));
        }
        buf.clear();
    }

    Ok(child.wait().await?)
}

/// Test names from libtest `--list` output
fn parse_test_list(output: &str) -> impl Iterator<Item = String> + '_ {
    output
        .lines()
        .filter_map(|line| line.strip_suffix(TEST_SUFFIX))
        .map(str::to_owned)
}
