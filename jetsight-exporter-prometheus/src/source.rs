//! Transport to the telemetry daemon.

use async_trait::async_trait;
use jetsight_common::{Result, SourceReading};

/// A connection to something that can report board telemetry.
///
/// Implementations are not required to be safe for concurrent use; the
/// session serializes every call.
#[async_trait]
pub trait TelemetrySource: Send {
    /// Human-readable location of the source, used in logs and errors.
    fn endpoint(&self) -> String;

    /// Establish (or re-establish) the connection.
    async fn connect(&mut self) -> Result<()>;

    /// Request and read the current board state.
    async fn fetch(&mut self) -> Result<SourceReading>;

    /// Release the connection. Must tolerate being called when not connected.
    async fn close(&mut self);
}

fn not_connected() -> jetsight_common::Error {
    std::io::Error::new(std::io::ErrorKind::NotConnected, "not connected").into()
}

#[cfg(unix)]
pub use unix::SocketSource;

#[cfg(unix)]
mod unix {
    use std::path::PathBuf;

    use async_trait::async_trait;
    use jetsight_common::{Format, Request, Response, Result, SourceReading, read_frame, write_frame};
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixStream;
    use tracing::{debug, trace};

    use super::{TelemetrySource, not_connected};

    /// Telemetry daemon reached through a Unix domain socket.
    pub struct SocketSource {
        path: PathBuf,
        format: Format,
        stream: Option<UnixStream>,
    }

    impl SocketSource {
        pub fn new(path: impl Into<PathBuf>, format: Format) -> Self {
            Self {
                path: path.into(),
                format,
                stream: None,
            }
        }
    }

    #[async_trait]
    impl TelemetrySource for SocketSource {
        fn endpoint(&self) -> String {
            self.path.display().to_string()
        }

        async fn connect(&mut self) -> Result<()> {
            // Drop any half-used stream before dialing again
            self.stream = None;
            let stream = UnixStream::connect(&self.path).await?;
            debug!(path = %self.path.display(), "Connected to telemetry daemon");
            self.stream = Some(stream);
            Ok(())
        }

        async fn fetch(&mut self) -> Result<SourceReading> {
            let format = self.format;
            let stream = self.stream.as_mut().ok_or_else(not_connected)?;

            write_frame(stream, &Request::Stats, format).await?;
            let response: Response = read_frame(stream, format).await?;
            trace!(path = %self.path.display(), "Received telemetry frame");

            response.into_reading()
        }

        async fn close(&mut self) {
            if let Some(mut stream) = self.stream.take() {
                if let Err(e) = stream.shutdown().await {
                    debug!(error = %e, "Error shutting down daemon socket");
                }
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use jetsight_common::FanReading;
        use tokio::net::UnixListener;

        #[tokio::test]
        async fn test_fetch_without_connect_fails() {
            let mut source = SocketSource::new("/nonexistent/jtop.sock", Format::Json);
            assert!(source.fetch().await.is_err());
        }

        #[tokio::test]
        async fn test_connect_missing_socket_fails() {
            let mut source = SocketSource::new("/nonexistent/jtop.sock", Format::Json);
            assert!(source.connect().await.is_err());
            assert_eq!(source.endpoint(), "/nonexistent/jtop.sock");
        }

        #[tokio::test]
        async fn test_fetch_roundtrip() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("daemon.sock");
            let listener = UnixListener::bind(&path).unwrap();

            let daemon = tokio::spawn(async move {
                let (mut conn, _) = listener.accept().await.unwrap();
                let request: Request = read_frame(&mut conn, Format::Cbor).await.unwrap();
                assert_eq!(request, Request::Stats);
                let reading = SourceReading {
                    fan: Some(FanReading { speed: 60.0 }),
                    ..Default::default()
                };
                write_frame(&mut conn, &Response::Stats(reading), Format::Cbor)
                    .await
                    .unwrap();
            });

            let mut source = SocketSource::new(&path, Format::Cbor);
            source.connect().await.unwrap();
            let reading = source.fetch().await.unwrap();
            assert_eq!(reading.fan.unwrap().speed, 60.0);

            source.close().await;
            // Second close is a no-op
            source.close().await;
            daemon.await.unwrap();
        }
    }
}
