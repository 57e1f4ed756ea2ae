// ABOUTME: Agent-side half of the agency: wire protocol, framed pipes, handshake and command loop.
// ABOUTME: Also hosts the shared test package model and the runner traits both ends speak.

pub mod command_loop;
pub mod identity;
pub mod package;
pub mod protocol;
pub mod runners;
pub mod traits;
pub mod transport;

pub use command_loop::{CommandLoop, LoopExit, StopSignal};
pub use identity::AgentId;
pub use package::{EngineResult, TestFilter, TestPackage};
pub use protocol::{Command, Reply};
pub use traits::{EventListener, RunnerFactory, TestRunner};
pub use transport::{
    ClientConnection, FramedChannel, HandshakeClient, HandshakeServer, PipeChannel,
    ServerConnection, TransportError,
};
