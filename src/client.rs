//! Request/response client for a Pace BMS on top of any [`Transport`].
//!
//! # Example
//!
//! ```no_run
//! use pacebms_lib::client::PaceBms;
//! use pacebms_lib::protocol::PackAddress;
//! use pacebms_lib::state::ParseHints;
//! use pacebms_lib::transport::SocketTransport;
//!
//! fn main() -> Result<(), pacebms_lib::Error> {
//!     let mut bms = PaceBms::new(SocketTransport::new("192.168.1.50", 5000));
//!     bms.connect()?;
//!     let version = bms.get_version()?;
//!     println!("Version: {}", version.version);
//!     let analog = bms.get_analog_data(PackAddress::All, ParseHints::default())?;
//!     for pack in &analog.packs {
//!         println!("Pack {}: {:?} mV", pack.pack_index, pack.cell_voltages_mv);
//!     }
//!     Ok(())
//! }
//! ```

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::protocol::*;
use crate::state::ParseHints;
use crate::transport::Transport;
use std::time::Duration;

/// Pause between writing a request and reading the reply.
pub const DEFAULT_RESPONSE_DELAY: Duration = Duration::from_millis(250);
pub const DEFAULT_READ_ATTEMPTS: u8 = 3;

#[derive(Debug)]
pub struct PaceBms<T: Transport> {
    transport: T,
    response_delay: Duration,
    read_attempts: u8,
}

impl<T: Transport> PaceBms<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            response_delay: DEFAULT_RESPONSE_DELAY,
            read_attempts: DEFAULT_READ_ATTEMPTS,
        }
    }

    pub fn set_response_delay(&mut self, delay: Duration) {
        log::trace!("set response delay to {delay:?}");
        self.response_delay = delay;
    }

    /// Number of reads tried per request while only malformed or no data arrives.
    pub fn set_read_attempts(&mut self, attempts: u8) {
        self.read_attempts = attempts.max(1);
    }

    pub fn connect(&mut self) -> Result<()> {
        self.transport.close();
        self.transport.open()
    }

    pub fn close(&mut self) {
        self.transport.close();
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_open()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[cfg(test)]
    pub(crate) fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn read_frame(&mut self) -> Result<Frame> {
        let mut last_error = Error::Frame("No data received".to_string());
        for attempt in 1..=self.read_attempts {
            let rx_buffer = self.transport.read_available()?;
            if rx_buffer.is_empty() {
                log::trace!("Read {} of {}: no data", attempt, self.read_attempts);
                last_error = Error::Frame("No data received".to_string());
                continue;
            }
            match Frame::decode(&rx_buffer) {
                Ok(frame) => return Ok(frame),
                Err(Error::Frame(reason)) => {
                    log::trace!(
                        "Read {} of {}: dropping frame ({reason})",
                        attempt,
                        self.read_attempts
                    );
                    last_error = Error::Frame(reason);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error)
    }

    /// Sends one request and returns the INFO of the validated reply.
    fn exchange(&mut self, tx_buffer: &[u8]) -> Result<Vec<u8>> {
        let result = self.transport.write(tx_buffer).and_then(|_| {
            if !self.response_delay.is_zero() {
                std::thread::sleep(self.response_delay);
            }
            self.read_frame()
        });
        match result {
            Ok(frame) => {
                log::trace!("received {frame:?}");
                frame.check_response()?;
                Ok(frame.info)
            }
            Err(err) => {
                if err.is_connection() {
                    log::error!("BMS communication error: {err}");
                    self.transport.close();
                }
                Err(err)
            }
        }
    }

    pub fn get_version(&mut self) -> Result<SoftwareVersion> {
        log::trace!("get version");
        SoftwareVersion::decode(&self.exchange(&SoftwareVersion::request()?)?)
    }

    pub fn get_serial_numbers(&mut self) -> Result<SerialNumbers> {
        log::trace!("get serial numbers");
        SerialNumbers::decode(&self.exchange(&SerialNumbers::request()?)?)
    }

    pub fn get_analog_data(
        &mut self,
        address: PackAddress,
        hints: ParseHints,
    ) -> Result<AnalogData> {
        log::trace!("get analog data for {address:?}");
        AnalogData::decode(
            &self.exchange(&AnalogData::request(address)?)?,
            address,
            hints,
        )
    }

    pub fn get_capacity(&mut self) -> Result<PackCapacity> {
        log::trace!("get capacity");
        PackCapacity::decode(&self.exchange(&PackCapacity::request()?)?)
    }

    pub fn get_warnings(
        &mut self,
        address: PackAddress,
        hints: ParseHints,
    ) -> Result<WarningInfo> {
        log::trace!("get warnings for {address:?}");
        WarningInfo::decode(
            &self.exchange(&WarningInfo::request(address)?)?,
            address,
            hints,
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::io::ErrorKind;

    /// In-memory BMS: answers each request by its CID2.
    #[derive(Debug, Default)]
    pub(crate) struct MockTransport {
        pub open: bool,
        pub fail_open: bool,
        pub fail_write: bool,
        pub opens: usize,
        pub written: Vec<Vec<u8>>,
        pub replies: HashMap<u8, Vec<u8>>,
        pub pending: VecDeque<Vec<u8>>,
    }

    impl MockTransport {
        pub fn reply(&mut self, cid2: u8, info: &str) {
            let frame = Frame::new(0x00, info.as_bytes().to_vec());
            self.replies.insert(cid2, frame.encode().unwrap());
        }

        pub fn requests_for(&self, cid2: u8) -> usize {
            self.written
                .iter()
                .filter(|tx| Frame::decode(tx).ok().map(|f| f.cid2) == Some(cid2))
                .count()
        }
    }

    impl Transport for MockTransport {
        fn open(&mut self) -> Result<()> {
            self.opens += 1;
            if self.fail_open {
                return Err(std::io::Error::new(ErrorKind::ConnectionRefused, "refused").into());
            }
            self.open = true;
            Ok(())
        }

        fn write(&mut self, bytes: &[u8]) -> Result<()> {
            if !self.open {
                return Err(Error::NotConnected);
            }
            if self.fail_write {
                return Err(std::io::Error::new(ErrorKind::BrokenPipe, "broken pipe").into());
            }
            self.written.push(bytes.to_vec());
            let cid2 = Frame::decode(bytes).unwrap().cid2;
            if let Some(reply) = self.replies.get(&cid2) {
                self.pending.push_back(reply.clone());
            }
            Ok(())
        }

        fn read_available(&mut self) -> Result<Vec<u8>> {
            if !self.open {
                return Err(Error::NotConnected);
            }
            Ok(self.pending.pop_front().unwrap_or_default())
        }

        fn close(&mut self) {
            self.open = false;
            self.pending.clear();
        }

        fn is_open(&self) -> bool {
            self.open
        }
    }

    fn bms(transport: MockTransport) -> PaceBms<MockTransport> {
        let mut bms = PaceBms::new(transport);
        bms.set_response_delay(Duration::ZERO);
        bms
    }

    #[test]
    fn version_exchange() {
        let mut transport = MockTransport::default();
        transport.reply(0xC1, "504143455F56312E32");
        let mut bms = bms(transport);
        bms.connect().unwrap();
        assert_eq!(bms.get_version().unwrap().version, "PACE_V1.2");
        assert_eq!(bms.transport().written[0], b"~250146C10000FD9A\r".to_vec());
    }

    #[test]
    fn no_reply_is_a_frame_error_after_retries() {
        let mut bms = bms(MockTransport::default());
        bms.connect().unwrap();
        assert!(matches!(bms.get_capacity(), Err(Error::Frame(_))));
        assert!(bms.is_connected());
    }

    #[test]
    fn malformed_read_is_retried() {
        let mut transport = MockTransport::default();
        transport.reply(0xA6, "01F403E803E8");
        let mut bms = bms(transport);
        bms.connect().unwrap();
        bms.transport.pending.push_back(b"~2501".to_vec());
        // the reply to the request lands after the stale partial frame
        let capacity = bms.get_capacity().unwrap();
        assert_eq!(capacity.full_mah, 10000);
    }

    #[test]
    fn corrupt_reply_is_not_retried() {
        let mut transport = MockTransport::default();
        transport.reply(0xA6, "01F403E803E8");
        let reply = transport.replies.get_mut(&0xA6).unwrap();
        reply[14] = b'9';
        let mut bms = bms(transport);
        bms.connect().unwrap();
        assert!(matches!(
            bms.get_capacity(),
            Err(Error::Checksum { field: "CHKSUM", .. })
        ));
    }

    #[test]
    fn error_return_code() {
        let mut transport = MockTransport::default();
        let frame = Frame {
            cid2: 0x04,
            ..Frame::new(0x00, Vec::new())
        };
        transport.replies.insert(0xC2, frame.encode().unwrap());
        let mut bms = bms(transport);
        bms.connect().unwrap();
        assert!(matches!(
            bms.get_serial_numbers(),
            Err(Error::Response(crate::frame::ResponseCode::InvalidCid2))
        ));
    }

    #[test]
    fn write_failure_closes_transport() {
        let mut bms = bms(MockTransport::default());
        bms.connect().unwrap();
        bms.transport.fail_write = true;
        let err = bms.get_version().unwrap_err();
        assert!(err.is_connection());
        assert!(!bms.is_connected());
    }
}
