//! Byte links to a controller
//!
//! The engine runs over any `AsyncRead + AsyncWrite` stream. The serial
//! bridge covers USB and UART controllers; tests use in-memory duplex
//! streams, and TCP bridges work unchanged.

pub mod serial;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::info;

use crate::core::{ApiVersion, EngineConfig, Result};
use crate::engine::{Engine, EngineHandle};

pub use self::serial::SerialConfig;

/// A stream the engine can own
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// A running engine with a negotiated version
pub struct Connection {
    pub handle: EngineHandle,
    pub task: JoinHandle<Result<()>>,
    pub version: ApiVersion,
}

/// Spawns an engine over `transport` and performs the version handshake
pub async fn connect<T: Transport>(transport: T, config: EngineConfig) -> Result<Connection> {
    let (handle, task) = Engine::spawn(transport, config)?;
    match handle.handshake().await {
        Ok(version) => Ok(Connection { handle, task, version }),
        Err(e) => {
            let _ = handle.shutdown().await;
            Err(e)
        }
    }
}

/// Opens a serial port and connects to the controller behind it
pub async fn connect_serial(serial: &SerialConfig, config: EngineConfig) -> Result<Connection> {
    let stream = serial::open(serial)?;
    let connection = connect(stream, config).await?;
    info!(path = %serial.path, version = %connection.version, "Connected");
    Ok(connection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Error;
    use crate::protocol::{message as codes, Frame, MspCodec};
    use futures::{SinkExt, StreamExt};
    use tokio_util::codec::Framed;

    #[tokio::test]
    async fn test_connect_handshakes() {
        let (client, device) = tokio::io::duplex(1024);
        let mut device = Framed::new(device, MspCodec::new());
        tokio::spawn(async move {
            let request = device.next().await.unwrap().unwrap();
            assert_eq!(request.code, codes::API_VERSION);
            device
                .send(Frame::response(codes::API_VERSION, vec![0u8, 1, 44]))
                .await
                .unwrap();
            // keep the link open
            while device.next().await.is_some() {}
        });

        let connection = connect(client, EngineConfig::default()).await.unwrap();
        assert_eq!(connection.version, ApiVersion::new(1, 44, 0));
        assert_eq!(connection.handle.api_version(), connection.version);
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_version() {
        let (client, device) = tokio::io::duplex(1024);
        let mut device = Framed::new(device, MspCodec::new());
        tokio::spawn(async move {
            device.next().await.unwrap().unwrap();
            device
                .send(Frame::response(codes::API_VERSION, vec![0u8, 0, 0]))
                .await
                .unwrap();
        });

        let err = connect(client, EngineConfig::default()).await.err().unwrap();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
