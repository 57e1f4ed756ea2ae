// ABOUTME: Runner implementations an agent can bind (libtest process runner, mock).
// ABOUTME: Each runner implements the TestRunner trait and exposes a RunnerFactory.

pub mod mock;
pub mod process;

pub use mock::{CallLog, MockRunner, RunnerCall};
pub use process::ProcessRunner;
