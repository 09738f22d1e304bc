use crate::error::{Error, Result};
use std::fmt;

pub const START_BYTE: u8 = 0x7e;
pub const END_BYTE: u8 = 0x0d;

pub const PROTOCOL_VERSION: u8 = 0x25;
pub const DEFAULT_ADDRESS: u8 = 0x01;
pub const CID1_BATTERY: u8 = 0x46;

/// SOI + VER + ADR + CID1 + CID2 + LENGTH
const HEADER_LENGTH: usize = 13;
const CHKSUM_LENGTH: usize = 4;
const MAX_LENID: usize = 0x0fff;

/// Return code carried in the CID2 position of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Normal,
    VersionError,
    ChecksumError,
    LengthChecksumError,
    InvalidCid2,
    CommandFormatError,
    InvalidData,
    OperationError,
}

impl From<u8> for ResponseCode {
    fn from(rtn: u8) -> Self {
        match rtn {
            0x01 => ResponseCode::VersionError,
            0x02 => ResponseCode::ChecksumError,
            0x03 => ResponseCode::LengthChecksumError,
            0x04 => ResponseCode::InvalidCid2,
            0x05 => ResponseCode::CommandFormatError,
            0x06 => ResponseCode::InvalidData,
            0x09 => ResponseCode::OperationError,
            _ => ResponseCode::Normal,
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResponseCode::Normal => write!(f, "RTN 00: normal"),
            ResponseCode::VersionError => write!(f, "RTN 01: version error"),
            ResponseCode::ChecksumError => write!(f, "RTN 02: CHKSUM error"),
            ResponseCode::LengthChecksumError => write!(f, "RTN 03: LCHKSUM error"),
            ResponseCode::InvalidCid2 => write!(f, "RTN 04: CID2 undefined"),
            ResponseCode::CommandFormatError => write!(f, "RTN 05: command format error"),
            ResponseCode::InvalidData => write!(f, "RTN 06: invalid data"),
            ResponseCode::OperationError => write!(f, "RTN 09: operation or write error"),
        }
    }
}

/// One protocol message. `info` holds the ASCII-hex INFO field exactly as sent on the wire.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    pub address: u8,
    pub cid1: u8,
    pub cid2: u8,
    pub info: Vec<u8>,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame {{ ver={:02X} adr={:02X} cid1={:02X} cid2={:02X} info={:?} }}",
            self.version,
            self.address,
            self.cid1,
            self.cid2,
            String::from_utf8_lossy(&self.info)
        )
    }
}

/// Sum of all bytes, negated modulo 65536.
pub fn calc_chksum(data: &[u8]) -> u16 {
    let sum = data
        .iter()
        .fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b)));
    (!sum).wrapping_add(1)
}

/// Sum of the three LENID nibbles, negated modulo 16.
pub fn calc_lchksum(lenid: u16) -> u8 {
    let sum = (lenid & 0x0f) + ((lenid >> 4) & 0x0f) + ((lenid >> 8) & 0x0f);
    ((!sum).wrapping_add(1) & 0x0f) as u8
}

fn push_hex_u8(buffer: &mut Vec<u8>, value: u8) {
    buffer.extend_from_slice(format!("{value:02X}").as_bytes());
}

fn parse_hex(buffer: &[u8], offset: usize, len: usize) -> Result<u16> {
    let field = &buffer[offset..offset + len];
    if !field.iter().all(u8::is_ascii_hexdigit) {
        return Err(Error::Frame(format!(
            "Invalid hex field at offset {offset}: {:02X?}",
            field
        )));
    }
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| u16::from_str_radix(s, 16).ok())
        .ok_or_else(|| {
            Error::Frame(format!(
                "Invalid hex field at offset {offset}: {:02X?}",
                field
            ))
        })
}

impl Frame {
    /// A request with the default protocol version, address and battery CID1.
    pub fn new(cid2: u8, info: Vec<u8>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            address: DEFAULT_ADDRESS,
            cid1: CID1_BATTERY,
            cid2,
            info,
        }
    }

    pub fn response_code(&self) -> ResponseCode {
        ResponseCode::from(self.cid2)
    }

    /// Fails with the BMS return code unless it is normal.
    pub fn check_response(&self) -> Result<()> {
        match self.response_code() {
            ResponseCode::Normal => Ok(()),
            code => Err(Error::Response(code)),
        }
    }

    fn length_field(&self) -> Result<u16> {
        if self.info.len() > MAX_LENID {
            return Err(Error::Frame(format!(
                "INFO too long - max={} len={}",
                MAX_LENID,
                self.info.len()
            )));
        }
        let lenid = self.info.len() as u16;
        Ok(u16::from(calc_lchksum(lenid)) << 12 | lenid)
    }

    /// Checksum this frame carries on the wire.
    pub fn checksum(&self) -> Result<u16> {
        let encoded = self.encode()?;
        let start = encoded.len() - CHKSUM_LENGTH - 1;
        parse_hex(&encoded, start, CHKSUM_LENGTH)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let length = self.length_field()?;
        let mut tx_buffer = Vec::with_capacity(HEADER_LENGTH + self.info.len() + 5);
        tx_buffer.push(START_BYTE);
        push_hex_u8(&mut tx_buffer, self.version);
        push_hex_u8(&mut tx_buffer, self.address);
        push_hex_u8(&mut tx_buffer, self.cid1);
        push_hex_u8(&mut tx_buffer, self.cid2);
        tx_buffer.extend_from_slice(format!("{length:04X}").as_bytes());
        tx_buffer.extend_from_slice(&self.info);
        let checksum = calc_chksum(&tx_buffer[1..]);
        tx_buffer.extend_from_slice(format!("{checksum:04X}").as_bytes());
        tx_buffer.push(END_BYTE);
        Ok(tx_buffer)
    }

    /// Extracts and validates the frame at the start of `rx_buffer`. Bytes after the end
    /// marker are ignored.
    pub fn decode(rx_buffer: &[u8]) -> Result<Self> {
        if rx_buffer.first() != Some(&START_BYTE) {
            return Err(Error::Frame(format!(
                "Incorrect start byte - received={:02X?}",
                rx_buffer.first()
            )));
        }
        if rx_buffer.len() < HEADER_LENGTH {
            return Err(Error::Frame(format!(
                "Frame header truncated - required={} received={}",
                HEADER_LENGTH,
                rx_buffer.len()
            )));
        }

        let version = parse_hex(rx_buffer, 1, 2)? as u8;
        let address = parse_hex(rx_buffer, 3, 2)? as u8;
        let cid1 = parse_hex(rx_buffer, 5, 2)? as u8;
        let cid2 = parse_hex(rx_buffer, 7, 2)? as u8;
        let length = parse_hex(rx_buffer, 9, 4)?;

        let lenid = length & 0x0fff;
        let lchksum = (length >> 12) as u8;
        let calculated = calc_lchksum(lenid);
        if lchksum != calculated {
            log::warn!(
                "Invalid length checksum - calculated={:X} received={:X}",
                calculated,
                lchksum
            );
            return Err(Error::Checksum {
                field: "LCHKSUM",
                calculated: u16::from(calculated),
                received: format!("{lchksum:X}"),
            });
        }

        let info_end = HEADER_LENGTH + lenid as usize;
        let frame_len = info_end + CHKSUM_LENGTH + 1;
        if rx_buffer.len() < frame_len {
            return Err(Error::Frame(format!(
                "Buffer shorter than declared length - required={} received={}",
                frame_len,
                rx_buffer.len()
            )));
        }
        if rx_buffer[frame_len - 1] != END_BYTE {
            return Err(Error::Frame(format!(
                "Missing end byte - received={:02X}",
                rx_buffer[frame_len - 1]
            )));
        }

        let checksum = calc_chksum(&rx_buffer[1..info_end]);
        let received = &rx_buffer[info_end..info_end + CHKSUM_LENGTH];
        if format!("{checksum:04X}").as_bytes() != received {
            log::warn!(
                "Invalid checksum - calculated={:04X} received={:02X?}",
                checksum,
                received
            );
            return Err(Error::Checksum {
                field: "CHKSUM",
                calculated: checksum,
                received: String::from_utf8_lossy(received).into_owned(),
            });
        }

        Ok(Self {
            version,
            address,
            cid1,
            cid2,
            info: rx_buffer[HEADER_LENGTH..info_end].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_request_checksum() {
        let frame = Frame {
            version: 0x20,
            address: 0x01,
            cid1: 0x46,
            cid2: 0x82,
            info: b"8520".to_vec(),
        };
        assert_eq!(frame.encode().unwrap(), b"~20014682C0048520FCC3\r".to_vec());
        assert_eq!(frame.checksum().unwrap(), 0xFCC3);
    }

    #[test]
    fn default_request_layout() {
        let frame = Frame::new(0x42, b"FF".to_vec());
        let encoded = frame.encode().unwrap();
        assert_eq!(&encoded[..13], b"~25014642E002");
        assert_eq!(*encoded.last().unwrap(), END_BYTE);
    }

    #[test]
    fn empty_info_has_zero_length_field() {
        let encoded = Frame::new(0xC1, Vec::new()).encode().unwrap();
        assert_eq!(&encoded[9..13], b"0000");
        assert_eq!(encoded.len(), 18);
    }

    #[test]
    fn lchksum() {
        assert_eq!(calc_lchksum(0x000), 0x0);
        assert_eq!(calc_lchksum(0x002), 0xE);
        assert_eq!(calc_lchksum(0x004), 0xC);
        assert_eq!(calc_lchksum(0x012), 0xD);
        // nibble sum of 16 wraps to zero
        assert_eq!(calc_lchksum(0x0F1), 0x0);
    }

    #[test]
    fn roundtrip_preserves_info() {
        for info in [&b""[..], b"FF", b"0102030405060708", &[b'A'; 300][..]] {
            let frame = Frame::new(0x42, info.to_vec());
            let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();
            assert_eq!(decoded.info, info);
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn corrupted_checksum_field_is_detected() {
        let encoded = Frame::new(0x00, b"1234ABCD".to_vec()).encode().unwrap();
        let chksum_start = encoded.len() - 5;
        for pos in chksum_start..encoded.len() - 1 {
            let mut corrupted = encoded.clone();
            corrupted[pos] ^= 0x01;
            match Frame::decode(&corrupted) {
                Err(Error::Checksum { field, .. }) => assert_eq!(field, "CHKSUM"),
                other => panic!("expected checksum error at {pos}, got {other:?}"),
            }
        }
    }

    #[test]
    fn corrupted_info_is_detected() {
        let mut encoded = Frame::new(0x00, b"1234ABCD".to_vec()).encode().unwrap();
        encoded[14] = b'9';
        assert!(matches!(
            Frame::decode(&encoded),
            Err(Error::Checksum { field: "CHKSUM", .. })
        ));
    }

    #[test]
    fn bad_length_checksum() {
        let mut encoded = Frame::new(0x00, b"FF".to_vec()).encode().unwrap();
        encoded[9] = b'0';
        assert!(matches!(
            Frame::decode(&encoded),
            Err(Error::Checksum {
                field: "LCHKSUM",
                ..
            })
        ));
    }

    #[test]
    fn frame_errors() {
        let encoded = Frame::new(0x00, b"0011".to_vec()).encode().unwrap();

        assert!(matches!(Frame::decode(&[]), Err(Error::Frame(_))));
        assert!(matches!(Frame::decode(&encoded[1..]), Err(Error::Frame(_))));
        assert!(matches!(
            Frame::decode(&encoded[..encoded.len() - 3]),
            Err(Error::Frame(_))
        ));

        let mut no_end = encoded.clone();
        *no_end.last_mut().unwrap() = b'\n';
        assert!(matches!(Frame::decode(&no_end), Err(Error::Frame(_))));

        let mut bad_header = encoded.clone();
        bad_header[3] = b'Z';
        assert!(matches!(Frame::decode(&bad_header), Err(Error::Frame(_))));

        let mut signed_header = encoded.clone();
        signed_header[3] = b'+';
        assert!(matches!(Frame::decode(&signed_header), Err(Error::Frame(_))));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut encoded = Frame::new(0x00, b"0A".to_vec()).encode().unwrap();
        encoded.extend_from_slice(b"~2501");
        assert_eq!(Frame::decode(&encoded).unwrap().info, b"0A");
    }

    #[test]
    fn response_codes() {
        let mut frame = Frame::new(0x00, Vec::new());
        assert!(frame.check_response().is_ok());
        frame.cid2 = 0x02;
        assert!(matches!(
            frame.check_response(),
            Err(Error::Response(ResponseCode::ChecksumError))
        ));
        frame.cid2 = 0x04;
        assert_eq!(frame.response_code(), ResponseCode::InvalidCid2);
    }
}
