//! Byte-stream endpoints the BMS can be reached over.

use crate::error::{Error, Result};
use crate::frame::{END_BYTE, START_BYTE};
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

pub const READ_BUFFER_LENGTH: usize = 4096;
pub const SOCKET_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
pub const SERIAL_READ_TIMEOUT: Duration = Duration::from_secs(1);
pub const SERIAL_BAUD_RATE: u32 = 9600;

/// A link to the BMS. Implementations report every failure as an error value.
pub trait Transport {
    fn open(&mut self) -> Result<()>;
    fn write(&mut self, bytes: &[u8]) -> Result<()>;
    /// Best-effort read of whatever the BMS has sent, bounded to one frame or
    /// [`READ_BUFFER_LENGTH`] bytes. An empty buffer means nothing usable arrived.
    fn read_available(&mut self) -> Result<Vec<u8>>;
    fn close(&mut self);
    fn is_open(&self) -> bool;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write(bytes)
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        (**self).read_available()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

/// First `\r` delimited chunk that starts with the frame start byte, with the
/// delimiter re-appended. Anything else in the receive buffer is stale or partial.
pub fn first_frame(rx_buffer: &[u8]) -> Option<Vec<u8>> {
    rx_buffer
        .split(|b| *b == END_BYTE)
        .find(|chunk| chunk.first() == Some(&START_BYTE))
        .map(|chunk| {
            let mut frame = Vec::with_capacity(chunk.len() + 1);
            frame.extend_from_slice(chunk);
            frame.push(END_BYTE);
            frame
        })
}

/// BMS reached through a TCP to RS485 gateway.
#[derive(Debug)]
pub struct SocketTransport {
    host: String,
    port: u16,
    timeout: Duration,
    stream: Option<TcpStream>,
}

impl SocketTransport {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout: SOCKET_CONNECT_TIMEOUT,
            stream: None,
        }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or(Error::NotConnected)
    }
}

impl Transport for SocketTransport {
    fn open(&mut self) -> Result<()> {
        log::info!("Trying to connect {}:{}", self.host, self.port);
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    ErrorKind::NotFound,
                    format!("Cannot resolve {}:{}", self.host, self.port),
                )
            })?;
        let stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        log::info!("BMS socket connected");
        self.stream = Some(stream);
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        log::trace!("write bytes: {bytes:02X?}");
        self.stream()?.write_all(bytes)?;
        Ok(())
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        let mut rx_buffer = vec![0; READ_BUFFER_LENGTH];
        let received = match self.stream()?.read(&mut rx_buffer) {
            Ok(0) => {
                return Err(Error::Connection(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "BMS closed the connection",
                )))
            }
            Ok(n) => n,
            Err(err) if is_timeout(&err) => {
                log::debug!("No data from BMS within {:?}", self.timeout);
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };
        log::trace!("receive_bytes: {:02X?}", &rx_buffer[..received]);
        Ok(first_frame(&rx_buffer[..received]).unwrap_or_default())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

/// BMS attached to a local serial port (RS232/RS485 adapter).
#[cfg(feature = "serialport")]
pub struct SerialTransport {
    device: String,
    timeout: Duration,
    serial: Option<Box<dyn serialport::SerialPort>>,
}

#[cfg(feature = "serialport")]
impl SerialTransport {
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
            timeout: SERIAL_READ_TIMEOUT,
            serial: None,
        }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn serial(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.serial.as_mut().ok_or(Error::NotConnected)
    }
}

#[cfg(feature = "serialport")]
impl Transport for SerialTransport {
    fn open(&mut self) -> Result<()> {
        log::info!("Trying to connect {}", self.device);
        let serial = serialport::new(&self.device, SERIAL_BAUD_RATE)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(self.timeout)
            .open()
            .map_err(std::io::Error::from)?;
        log::info!("BMS serial connected");
        self.serial = Some(serial);
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let serial = self.serial()?;
        // drop late replies to earlier requests
        let pending = serial.bytes_to_read().map_err(std::io::Error::from)?;
        if pending > 0 {
            log::trace!("Discarding {pending} pending bytes");
            serial
                .clear(serialport::ClearBuffer::Input)
                .map_err(std::io::Error::from)?;
        }
        log::trace!("write bytes: {bytes:02X?}");
        serial.write_all(bytes)?;
        Ok(())
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        let serial = self.serial()?;
        let mut rx_buffer = Vec::with_capacity(128);
        let mut byte = [0u8; 1];
        while rx_buffer.len() < READ_BUFFER_LENGTH {
            match serial.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => {
                    rx_buffer.push(byte[0]);
                    if byte[0] == END_BYTE {
                        break;
                    }
                }
                Err(err) if is_timeout(&err) => break,
                Err(err) => return Err(err.into()),
            }
        }
        log::trace!("receive_bytes: {rx_buffer:02X?}");
        Ok(rx_buffer)
    }

    fn close(&mut self) {
        self.serial = None;
    }

    fn is_open(&self) -> bool {
        self.serial.is_some()
    }
}
