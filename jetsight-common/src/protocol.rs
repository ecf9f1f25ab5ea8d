//! Request/response framing for the telemetry daemon socket.
//!
//! Every message is a 4-byte big-endian payload length followed by the
//! payload, encoded as JSON or CBOR.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::serialization::{Format, decode, encode};
use crate::telemetry::SourceReading;

/// Largest accepted frame payload.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Requests understood by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Request {
    /// Ask for the current board state.
    Stats,
}

/// Daemon replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Stats(SourceReading),
    Error { message: String },
}

impl Response {
    /// Extract the reading, turning a daemon-side error into [`Error::Daemon`].
    pub fn into_reading(self) -> Result<SourceReading> {
        match self {
            Response::Stats(reading) => Ok(reading),
            Response::Error { message } => Err(Error::Daemon(message)),
        }
    }
}

/// Encode `value` and write it as a single frame.
pub async fn write_frame<W, T>(writer: &mut W, value: &T, format: Format) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = encode(value, format)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(Error::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }

    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a single frame and decode it.
pub async fn read_frame<R, T>(reader: &mut R, format: Format) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        warn!(len, max = MAX_FRAME_LEN, "Rejecting oversized frame");
        return Err(Error::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    trace!(len, format = format.mime_type(), "Frame received");
    decode(&payload, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::FanReading;

    #[tokio::test]
    async fn test_request_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame(&mut client, &Request::Stats, Format::Json)
            .await
            .unwrap();
        let request: Request = read_frame(&mut server, Format::Json).await.unwrap();

        assert_eq!(request, Request::Stats);
    }

    #[tokio::test]
    async fn test_response_over_duplex_cbor() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let reading = SourceReading {
            fan: Some(FanReading { speed: 33.0 }),
            ..Default::default()
        };

        write_frame(&mut server, &Response::Stats(reading.clone()), Format::Cbor)
            .await
            .unwrap();
        let response: Response = read_frame(&mut client, Format::Cbor).await.unwrap();

        assert_eq!(response.into_reading().unwrap(), reading);
    }

    #[test]
    fn test_request_wire_shape() {
        assert_eq!(serde_json::to_string(&Request::Stats).unwrap(), "\"stats\"");
    }

    #[test]
    fn test_error_response_into_reading() {
        let response: Response =
            serde_json::from_str(r#"{"error": {"message": "jtop service stopped"}}"#).unwrap();

        match response.into_reading() {
            Err(Error::Daemon(message)) => assert_eq!(message, "jtop service stopped"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);

        client
            .write_u32((MAX_FRAME_LEN + 1) as u32)
            .await
            .unwrap();
        let result: Result<Response> = read_frame(&mut server, Format::Json).await;

        assert!(matches!(result, Err(Error::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_io_error() {
        let (mut client, mut server) = tokio::io::duplex(64);

        client.write_u32(100).await.unwrap();
        client.write_all(b"{\"stats\"").await.unwrap();
        drop(client);

        let result: Result<Response> = read_frame(&mut server, Format::Json).await;
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
