//! Client for a running CIX driver.
//!
//! Responses can arrive out of order; the client parks frames for other ids
//! until someone asks for them.

use crate::{
    connect_tcp, BoxedReader, BoxedWriter, Command, FramedReader, FramedWriter, IpcError,
    RequestFrame, Response, ResponseData, ResponseFrame,
};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// Request/response timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A connection to a driver.
pub struct DriverClient<R, W> {
    reader: FramedReader<R>,
    writer: FramedWriter<W>,
    next_id: u64,
    parked: VecDeque<ResponseFrame>,
    timeout: Duration,
}

impl DriverClient<BoxedReader, BoxedWriter> {
    /// Connect to a driver listening on `address`.
    pub async fn connect(address: &str) -> Result<Self, IpcError> {
        let (reader, writer) = connect_tcp(address).await?;
        Ok(Self::from_framed(reader, writer))
    }
}

impl<R, W> DriverClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Client over an already established byte stream pair.
    pub fn new(reader: R, writer: W) -> Self {
        Self::from_framed(FramedReader::new(reader), FramedWriter::new(writer))
    }

    pub fn from_framed(reader: FramedReader<R>, writer: FramedWriter<W>) -> Self {
        Self {
            reader,
            writer,
            next_id: 1,
            parked: VecDeque::new(),
            timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send `command` without waiting. Returns the request id.
    pub async fn send(&mut self, command: Command) -> Result<u64, IpcError> {
        let id = self.next_id;
        self.next_id = id.saturating_add(1);
        self.send_frame(&RequestFrame::new(id, command)).await?;
        Ok(id)
    }

    /// Send a fully formed frame, e.g. to reuse an id.
    pub async fn send_frame(&mut self, frame: &RequestFrame) -> Result<(), IpcError> {
        self.next_id = self.next_id.max(frame.id.saturating_add(1));
        self.writer.write(frame).await
    }

    /// Next response frame in arrival order, parked ones first.
    pub async fn recv(&mut self) -> Result<ResponseFrame, IpcError> {
        match self.parked.pop_front() {
            Some(frame) => Ok(frame),
            None => self.read_response().await,
        }
    }

    /// Wait for the response to request `id`.
    pub async fn wait_for(&mut self, id: u64) -> Result<Response, IpcError> {
        if let Some(at) = self.parked.iter().position(|f| f.id == id) {
            if let Some(frame) = self.parked.remove(at) {
                return Ok(frame.response);
            }
        }

        let timeout = self.timeout;
        tokio::time::timeout(timeout, self.read_until(id)).await?
    }

    async fn read_until(&mut self, id: u64) -> Result<Response, IpcError> {
        loop {
            let frame = self.read_response().await?;
            if frame.id == id {
                return Ok(frame.response);
            }
            self.parked.push_back(frame);
        }
    }

    /// Send `command` and wait for its response.
    pub async fn request(&mut self, command: Command) -> Result<Response, IpcError> {
        let id = self.send(command).await?;
        self.wait_for(id).await
    }

    /// Round-trip a ping.
    pub async fn ping(&mut self) -> Result<i64, IpcError> {
        match self.expect_data(Command::Ping).await? {
            ResponseData::Pong { timestamp } => Ok(timestamp),
            other => Err(unexpected(&other)),
        }
    }

    /// Driver status.
    pub async fn status(&mut self) -> Result<ResponseData, IpcError> {
        self.expect_data(Command::Status).await
    }

    /// Ask the driver to exit and wait for the acknowledgement.
    pub async fn shutdown(&mut self) -> Result<Response, IpcError> {
        self.request(Command::Shutdown).await
    }

    async fn expect_data(&mut self, command: Command) -> Result<ResponseData, IpcError> {
        match self.request(command).await? {
            Response::Ok { data: Some(data) } => Ok(data),
            Response::Error { code, message } => Err(IpcError::ConnectionFailed(format!(
                "{:?}: {}",
                code, message
            ))),
            Response::Ok { data: None } => Err(IpcError::ConnectionFailed(
                "Unexpected empty response".to_string(),
            )),
        }
    }

    async fn read_response(&mut self) -> Result<ResponseFrame, IpcError> {
        self.reader
            .read()
            .await?
            .ok_or_else(|| IpcError::ConnectionFailed("driver closed the connection".to_string()))
    }
}

fn unexpected(data: &ResponseData) -> IpcError {
    IpcError::ConnectionFailed(format!("Unexpected response: {:?}", data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;

    /// Answers pings in reverse order of arrival to exercise parking.
    async fn reversing_driver(reader: tokio::io::DuplexStream, writer: tokio::io::DuplexStream) {
        let mut reader = FramedReader::new(reader);
        let mut writer = FramedWriter::new(writer);

        let mut ids = Vec::new();
        for _ in 0..2 {
            let frame: RequestFrame = reader.read().await.unwrap().unwrap();
            ids.push(frame.id);
        }
        for id in ids.into_iter().rev() {
            let response = Response::ok_with(ResponseData::Pong { timestamp: id as i64 });
            writer.write(&ResponseFrame::new(id, response)).await.unwrap();
        }

        let frame: RequestFrame = reader.read().await.unwrap().unwrap();
        let response = Response::error(ErrorCode::InternalError, "boom");
        writer.write(&ResponseFrame::new(frame.id, response)).await.unwrap();
    }

    #[tokio::test]
    async fn test_out_of_order_responses() {
        let (client_out, driver_in) = tokio::io::duplex(4096);
        let (driver_out, client_in) = tokio::io::duplex(4096);
        tokio::spawn(reversing_driver(driver_in, driver_out));

        let mut client = DriverClient::new(client_in, client_out);
        let first = client.send(Command::Ping).await.unwrap();
        let second = client.send(Command::Ping).await.unwrap();
        assert_ne!(first, second);

        let response = client.wait_for(first).await.unwrap();
        assert_eq!(
            response,
            Response::ok_with(ResponseData::Pong {
                timestamp: first as i64
            })
        );
        // The second response arrived first and was parked.
        let parked = client.recv().await.unwrap();
        assert_eq!(parked.id, second);

        let err = client.status().await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_parked_frames_keep_arrival_order() {
        let (client_out, driver_in) = tokio::io::duplex(4096);
        let (driver_out, client_in) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let mut reader = FramedReader::new(driver_in);
            let mut writer = FramedWriter::new(driver_out);
            let mut ids = Vec::new();
            for _ in 0..3 {
                let frame: RequestFrame = reader.read().await.unwrap().unwrap();
                ids.push(frame.id);
            }
            for id in ids.into_iter().rev() {
                writer.write(&ResponseFrame::new(id, Response::ok())).await.unwrap();
            }
        });

        let mut client = DriverClient::new(client_in, client_out);
        let a = client.send(Command::Ping).await.unwrap();
        let b = client.send(Command::Ping).await.unwrap();
        let c = client.send(Command::Ping).await.unwrap();

        client.wait_for(a).await.unwrap();
        // c then b were parked while waiting for a.
        assert_eq!(client.recv().await.unwrap().id, c);
        assert_eq!(client.recv().await.unwrap().id, b);
    }

    #[tokio::test]
    async fn test_max_request_id_does_not_overflow() {
        let (client_out, _driver_in) = tokio::io::duplex(4096);
        let (_driver_out, client_in) = tokio::io::duplex(64);

        let mut client = DriverClient::new(client_in, client_out);
        client
            .send_frame(&RequestFrame::new(u64::MAX, Command::Ping))
            .await
            .unwrap();
        assert_eq!(client.send(Command::Ping).await.unwrap(), u64::MAX);
        assert_eq!(client.send(Command::Ping).await.unwrap(), u64::MAX);
    }

    #[tokio::test]
    async fn test_closed_connection() {
        let (client_out, _driver_in) = tokio::io::duplex(64);
        let (driver_out, client_in) = tokio::io::duplex(64);
        drop(driver_out);

        let mut client = DriverClient::new(client_in, client_out);
        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, IpcError::ConnectionFailed(_)));
    }
}
