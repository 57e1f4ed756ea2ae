// ABOUTME: Pipe transport - length-prefixed framing, client/server connections and the handshake.
// ABOUTME: Channels are Unix-domain stream sockets named after the agency's rendezvous point.

pub mod connection;
pub mod endpoint;
pub mod error;
pub mod framed;
pub mod handshake;

pub use connection::{ClientConnection, PipeChannel, ServerConnection};
pub use error::TransportError;
pub use framed::{FrameReader, FrameWriter, FramedChannel, MAX_FRAME_SIZE};
pub use handshake::{
    AcceptedAgent, HandshakeClient, HandshakeServer, CONNECT_TIMEOUT, IDENTITY_TIMEOUT,
};
