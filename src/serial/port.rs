//! Byte-level I/O on the single UART to the radio co-processor.
//!
//! Two dedicated OS threads bridge the blocking `serialport` API into the
//! async world: a reader thread pushes raw bytes into a bounded channel the
//! inbound framer task consumes, and a writer thread drains a channel fed
//! by [`crate::outbound::manager::SerialWriter`] implementations. Leaked
//! `'static` channels bridge these blocking OS threads into the Embassy
//! executor.

use std::io::ErrorKind;
use std::sync::mpsc;
use std::time::Duration as StdDuration;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{error, warn};

use crate::error::GatewayError;
use crate::outbound::manager::SerialWriter;

const RX_CHANNEL_SIZE: usize = 4096;
const INTER_BYTE_TIMEOUT: StdDuration = StdDuration::from_millis(20);

pub type RxByteChannel = Channel<CriticalSectionRawMutex, u8, RX_CHANNEL_SIZE>;

/// Opens the serial port at `path` and spawns the reader/writer threads.
///
/// Returns a `'static` byte channel for the inbound framer to consume, and
/// a [`SerialWriter`] handle the outbound manager funnels every frame
/// through (design §5: "the serial link itself is funneled through the
/// outbound manager; no other path writes").
pub fn open(path: &str, baud_rate: u32) -> Result<(&'static RxByteChannel, PortWriter), GatewayError> {
    let port = serialport::new(path, baud_rate)
        .timeout(INTER_BYTE_TIMEOUT)
        .open()
        .map_err(|source| GatewayError::SerialPort { path: path.to_string(), source })?;

    let rx_channel: &'static RxByteChannel = Box::leak(Box::new(Channel::new()));

    let mut reader_port = port.try_clone().map_err(|source| GatewayError::SerialPort {
        path: path.to_string(),
        source,
    })?;
    std::thread::Builder::new()
        .name("shadelink-serial-rx".to_string())
        .spawn(move || {
            let mut byte = [0u8; 1];
            loop {
                match reader_port.read(&mut byte) {
                    Ok(1) => {
                        // Reader thread has no async context; try_send drops
                        // on a full channel rather than blocking the link.
                        if rx_channel.try_send(byte[0]).is_err() {
                            warn!("serial rx channel full, dropping byte");
                        }
                    }
                    Ok(_) => {}
                    Err(ref e) if e.kind() == ErrorKind::TimedOut => {}
                    Err(e) => {
                        error!("serial read error: {e}");
                        std::thread::sleep(StdDuration::from_millis(50));
                    }
                }
            }
        })
        .expect("failed to spawn serial rx thread");

    let (write_tx, write_rx) = mpsc::channel::<Vec<u8>>();
    let mut writer_port = port;
    std::thread::Builder::new()
        .name("shadelink-serial-tx".to_string())
        .spawn(move || {
            for frame in write_rx {
                if let Err(e) = writer_port.write_all(&frame) {
                    error!("serial write error: {e}");
                }
            }
        })
        .expect("failed to spawn serial tx thread");

    Ok((rx_channel, PortWriter { write_tx }))
}

/// Cloneable handle that forwards frames to the writer thread's mailbox.
#[derive(Clone)]
pub struct PortWriter {
    write_tx: mpsc::Sender<Vec<u8>>,
}

impl SerialWriter for PortWriter {
    fn write_frame(&self, bytes: &[u8]) {
        if self.write_tx.send(bytes.to_vec()).is_err() {
            error!("serial tx thread gone, frame dropped");
        }
    }
}
