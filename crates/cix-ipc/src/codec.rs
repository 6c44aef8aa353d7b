//! Length-prefixed framing shared by every transport.
//!
//! A frame is a 4-byte little-endian body length followed by the body.

use crate::IpcError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame body size (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Serialize a frame body as MessagePack with named fields.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, IpcError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

/// Decode a frame body, trying MessagePack first and then JSON.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, IpcError> {
    let msgpack_err = match rmp_serde::from_slice(body) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    // JSON fallback, useful for testing with nc/socat
    if let Ok(value) = serde_json::from_slice(body) {
        return Ok(value);
    }

    Err(IpcError::Deserialize(msgpack_err))
}

#[derive(Deserialize)]
struct IdOnly {
    id: u64,
}

/// Best-effort recovery of the `id` of a body that failed to decode.
pub fn recover_id(body: &[u8]) -> Option<u64> {
    decode::<IdOnly>(body).ok().map(|frame| frame.id)
}

/// Reads whole frames from a byte stream.
pub struct FramedReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Next frame body. `None` on a clean end of stream between frames.
    ///
    /// A length over [`MAX_FRAME_SIZE`] or an end of stream inside a frame
    /// leaves the stream unusable.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, IpcError> {
        let mut len_buf = [0u8; 4];
        let mut filled = 0;
        while filled < len_buf.len() {
            let n = self.inner.read(&mut len_buf[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(IpcError::Desynchronized(format!(
                    "stream ended after {} of 4 length bytes",
                    filled
                )));
            }
            filled += n;
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(IpcError::FrameTooLarge(len));
        }

        let mut body = vec![0u8; len];
        self.inner.read_exact(&mut body).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                IpcError::Desynchronized(format!("stream ended inside a {} byte frame", len))
            } else {
                IpcError::Io(e)
            }
        })?;
        Ok(Some(body))
    }

    /// Next frame decoded as `T`; decode failures are returned as
    /// non-fatal [`IpcError::Deserialize`].
    pub async fn read<T: DeserializeOwned>(&mut self) -> Result<Option<T>, IpcError> {
        match self.read_frame().await? {
            Some(body) => decode(&body).map(Some),
            None => Ok(None),
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes whole frames to a byte stream.
pub struct FramedWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FramedWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write a raw body as one frame and flush.
    pub async fn write_frame(&mut self, body: &[u8]) -> Result<(), IpcError> {
        if body.len() > MAX_FRAME_SIZE {
            return Err(IpcError::FrameTooLarge(body.len()));
        }
        let len_bytes = (body.len() as u32).to_le_bytes();

        self.inner.write_all(&len_bytes).await?;
        self.inner.write_all(body).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Encode `value` and write it as one frame.
    pub async fn write<T: Serialize>(&mut self, value: &T) -> Result<(), IpcError> {
        let body = encode(value)?;
        self.write_frame(&body).await
    }

    pub async fn shutdown(&mut self) -> Result<(), IpcError> {
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
