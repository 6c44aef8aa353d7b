//! Transports carrying the framed protocol.
//!
//! The driver talks over stdin/stdout pipes, dials out to a front-end
//! listening on `host:port`, or accepts a single connection itself. All
//! three produce the same framed reader/writer pair.

use crate::{FramedReader, FramedWriter, IpcError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

/// Connection timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

type Framed = (FramedReader<BoxedReader>, FramedWriter<BoxedWriter>);

/// Frames over this process's stdin and stdout.
pub fn stdio() -> Framed {
    (
        FramedReader::new(Box::new(tokio::io::stdin())),
        FramedWriter::new(Box::new(tokio::io::stdout())),
    )
}

/// Frames over a TCP connection to `address`.
pub async fn connect_tcp(address: &str) -> Result<Framed, IpcError> {
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(address))
        .await
        .map_err(|_| IpcError::ConnectionFailed(format!("connecting to {} timed out", address)))?
        .map_err(|e| IpcError::ConnectionFailed(format!("{}: {}", address, e)))?;
    stream.set_nodelay(true)?;

    info!(address, "Connected");
    Ok(split(stream))
}

/// Frames over the first connection accepted on `listener`.
pub async fn listen_tcp(listener: &TcpListener) -> Result<Framed, IpcError> {
    let (stream, peer) = listener.accept().await?;
    stream.set_nodelay(true)?;

    info!(peer = %peer, "Accepted connection");
    Ok(split(stream))
}

fn split(stream: TcpStream) -> Framed {
    let (read, write) = stream.into_split();
    (
        FramedReader::new(Box::new(read)),
        FramedWriter::new(Box::new(write)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Command, RequestFrame};

    #[tokio::test]
    async fn test_tcp_both_directions() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let accept = tokio::spawn(async move { listen_tcp(&listener).await.unwrap() });
        let (_, mut client_writer) = connect_tcp(&address).await.unwrap();
        let (mut server_reader, _) = accept.await.unwrap();

        client_writer
            .write(&RequestFrame::new(1, Command::Ping))
            .await
            .unwrap();
        let frame: RequestFrame = server_reader.read().await.unwrap().unwrap();
        assert_eq!(frame.command, Command::Ping);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = connect_tcp(&address).await;
        assert!(matches!(result, Err(IpcError::ConnectionFailed(_))));
    }
}
