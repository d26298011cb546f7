//! Serial port reader
//!
//! A background task reads the port and hands chunks to the tick loop
//! through a bounded channel that plays the part of the hardware receive
//! buffer: when the loop falls behind, new chunks are dropped.

use crate::config::SerialConfig;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};
use tracing::{error, info, warn};

/// Delay before reopening a failed port
const REOPEN_DELAY: Duration = Duration::from_secs(2);

/// Largest chunk handed over per read
pub const CHUNK_SIZE: usize = 1024;

/// A non-blocking source of received bytes
pub trait ByteSource: Send {
    /// Next buffered chunk, or `None` when nothing is waiting
    fn try_chunk(&mut self) -> Option<Bytes>;

    /// Bytes lost to a full receive buffer so far
    fn overrun_bytes(&self) -> u64 {
        0
    }
}

/// Receives bytes from the serial port
pub struct SerialReader {
    rx: mpsc::Receiver<Bytes>,
    overflow: Arc<AtomicU64>,
    _task: tokio::task::JoinHandle<()>,
}

impl SerialReader {
    /// Open the port in the background and start reading
    pub fn spawn(config: SerialConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.buffer_chunks);
        let overflow = Arc::new(AtomicU64::new(0));

        let overflow_clone = overflow.clone();
        let task = tokio::spawn(async move {
            read_loop(config, tx, overflow_clone).await;
        });

        Self {
            rx,
            overflow,
            _task: task,
        }
    }
}

impl ByteSource for SerialReader {
    fn try_chunk(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    fn overrun_bytes(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }
}

/// Open, read until failure, wait, reopen
async fn read_loop(config: SerialConfig, tx: mpsc::Sender<Bytes>, overflow: Arc<AtomicU64>) {
    loop {
        let port = tokio_serial::new(&config.port, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async();

        match port {
            Ok(stream) => {
                info!("UART ready on {} @ {} baud", config.port, config.baud_rate);
                match pump(stream, &tx, &overflow).await {
                    Ok(()) => warn!("[UART] Port closed: {}", config.port),
                    Err(PumpError::Io(e)) => error!("[UART] Read error on {}: {}", config.port, e),
                    Err(PumpError::ReceiverGone) => return,
                }
            }
            Err(e) => {
                error!("[UART] Failed to open {}: {}", config.port, e);
            }
        }

        tokio::time::sleep(REOPEN_DELAY).await;
    }
}

#[derive(Debug)]
enum PumpError {
    Io(std::io::Error),
    ReceiverGone,
}

/// Move bytes from `stream` into the channel until EOF or error
async fn pump<R>(
    mut stream: R,
    tx: &mpsc::Sender<Bytes>,
    overflow: &AtomicU64,
) -> Result<(), PumpError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = stream.read(&mut buf).await.map_err(PumpError::Io)?;
        if n == 0 {
            return Ok(());
        }

        match tx.try_send(Bytes::copy_from_slice(&buf[..n])) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(chunk)) => {
                let total = overflow.fetch_add(chunk.len() as u64, Ordering::Relaxed)
                    + chunk.len() as u64;
                warn!(
                    "[UART] Receive buffer full, dropped {} bytes ({} total)",
                    chunk.len(),
                    total
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(PumpError::ReceiverGone),
        }
    }
}
