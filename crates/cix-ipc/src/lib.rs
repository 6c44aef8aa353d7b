//! CIX IPC Protocol and Transport
//!
//! Frame definitions, the length-prefixed framing shared by every
//! transport, stdio and TCP transports for the driver, and a client used by
//! the CLI and tests.

mod client;
mod codec;
mod error;
mod protocol;
mod transport;

pub use client::DriverClient;
pub use codec::{decode, encode, recover_id, FramedReader, FramedWriter, MAX_FRAME_SIZE};
pub use error::IpcError;
pub use protocol::*;
pub use transport::{connect_tcp, listen_tcp, stdio, BoxedReader, BoxedWriter};
