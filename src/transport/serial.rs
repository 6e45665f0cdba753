//! Serial port link
//!
//! `serialport` is blocking, so the port is driven from two blocking
//! threads that pump bytes into an in-memory duplex stream. The engine only
//! ever sees the async end of that stream.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serialport::{DataBits, FlowControl, Parity, StopBits};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::core::{Error, Result};

/// Bytes buffered in each direction between the port threads and the engine
const BRIDGE_BUFFER: usize = 8192;

const CHUNK_SIZE: usize = 512;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub path: String,
    pub baud_rate: u32,
    /// How long a blocking read waits before checking for shutdown
    #[serde(serialize_with = "crate::core::serde::serialize_millis")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_millis")]
    pub read_timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            path: String::new(),
            baud_rate: 115_200,
            read_timeout: Duration::from_millis(50),
        }
    }
}

impl SerialConfig {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        SerialConfig {
            path: path.into(),
            baud_rate,
            ..SerialConfig::default()
        }
    }
}

/// Opens a port as 8N1 without flow control and bridges it onto a duplex
/// stream. Must be called from within a tokio runtime.
pub fn open(config: &SerialConfig) -> Result<DuplexStream> {
    let port = serialport::new(&config.path, config.baud_rate)
        .timeout(config.read_timeout)
        .data_bits(DataBits::Eight)
        .stop_bits(StopBits::One)
        .parity(Parity::None)
        .flow_control(FlowControl::None)
        .open()
        .map_err(|e| Error::transport(format!("failed to open {}: {}", config.path, e)))?;
    let writer = port
        .try_clone()
        .map_err(|e| Error::transport(format!("failed to clone {}: {}", config.path, e)))?;

    info!(path = %config.path, baud = config.baud_rate, "Serial port open");
    bridge(port, writer)
}

/// Names of the serial ports on this machine
pub fn list_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports()
        .map_err(|e| Error::transport(format!("failed to list ports: {}", e)))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// Pumps a blocking reader and writer through a duplex stream.
///
/// The stream reports end of file once `reader` does. Dropping the returned
/// stream stops both threads.
pub fn bridge<R, W>(mut reader: R, mut writer: W) -> Result<DuplexStream>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    let runtime = Handle::try_current()
        .map_err(|e| Error::transport(format!("serial bridge needs a runtime: {}", e)))?;
    let (engine_side, port_side) = tokio::io::duplex(BRIDGE_BUFFER);
    let (mut from_engine, mut to_engine) = tokio::io::split(port_side);
    let closed = Arc::new(AtomicBool::new(false));

    let inbound = runtime.clone();
    let reader_closed = closed.clone();
    runtime.spawn_blocking(move || {
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    debug!("Serial port reached end of file");
                    break;
                }
                Ok(n) => {
                    if inbound.block_on(to_engine.write_all(&buf[..n])).is_err() {
                        break;
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {
                    if reader_closed.load(Ordering::Acquire) {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Serial read failed");
                    break;
                }
            }
        }
        let _ = inbound.block_on(to_engine.shutdown());
    });

    let outbound = runtime.clone();
    runtime.spawn_blocking(move || {
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            let n = match outbound.block_on(from_engine.read(&mut buf)) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if let Err(e) = writer.write_all(&buf[..n]).and_then(|_| writer.flush()) {
                warn!(error = %e, "Serial write failed");
                break;
            }
        }
        closed.store(true, Ordering::Release);
        debug!("Serial writer stopped");
    });

    Ok(engine_side)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_config_defaults() {
        let config: SerialConfig = serde_json::from_str(r#"{"path": "/dev/ttyACM0"}"#).unwrap();
        assert_eq!(config, SerialConfig::new("/dev/ttyACM0", 115_200));
        assert_eq!(config.read_timeout, Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_open_missing_port() {
        let err = open(&SerialConfig::new("/dev/does-not-exist-msp", 115_200)).unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bridge_reads_until_eof() {
        let incoming = b"$M>\x00\x65\x65".to_vec();
        let mut stream = bridge(Cursor::new(incoming.clone()), SharedBuf::default()).unwrap();

        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, incoming);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bridge_writes_through() {
        let sink = SharedBuf::default();
        let mut stream = bridge(Cursor::new(Vec::new()), sink.clone()).unwrap();
        stream.write_all(b"$M<\x00\x01\x01").await.unwrap();
        stream.flush().await.unwrap();

        for _ in 0..100 {
            if sink.0.lock().unwrap().len() == 6 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(&sink.0.lock().unwrap()[..], b"$M<\x00\x01\x01");
    }
}
