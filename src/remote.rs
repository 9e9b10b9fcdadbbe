//! Remote command rendering, transport, execution and output streaming.

pub mod buffer;
pub mod command;
pub mod executor;
pub mod streamer;
pub mod transport;

pub use buffer::OutputBuffer;
pub use command::{Action, RemoteCommand, render, render_action};
pub use executor::{ExecutionResult, RemoteExecutor};
pub use streamer::{CollectingSink, LogSink, NullSink, OutputSink, OutputStreamer};
pub use transport::{LocalTransport, RemoteExit, RemoteTransport, SshTransport};
