use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::state::ParseHints;
use serde::Serialize;
use std::fmt;

/// Command identifiers sent in the CID2 position of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    AnalogData = 0x42,
    WarningInfo = 0x44,
    Capacity = 0xA6,
    SoftwareVersion = 0xC1,
    SerialNumber = 0xC2,
}

/// Which pack(s) a request addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackAddress {
    All,
    Pack(u8),
}

impl PackAddress {
    pub fn as_byte(self) -> u8 {
        match self {
            PackAddress::All => 0xFF,
            PackAddress::Pack(n) => n,
        }
    }

    fn info(self) -> Vec<u8> {
        format!("{:02X}", self.as_byte()).into_bytes()
    }

    /// Index of the `n`-th (1-based) pack in a response to this address. Never below 1.
    fn pack_index(self, n: u8) -> u8 {
        match self {
            PackAddress::All => n,
            PackAddress::Pack(first) => first.max(1).saturating_add(n - 1),
        }
    }
}

impl From<u8> for PackAddress {
    fn from(value: u8) -> Self {
        if value == 0xFF {
            PackAddress::All
        } else {
            PackAddress::Pack(value)
        }
    }
}

fn create_request(command: Command, info: Vec<u8>) -> Result<Vec<u8>> {
    Frame::new(command as u8, info).encode()
}

macro_rules! read_bit {
    ($byte:expr,$position:expr) => {
        ($byte >> $position) & 1 != 0
    };
}

/// Walks an ASCII-hex INFO payload. Offsets are in characters.
struct HexCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> HexCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn offset(&self) -> usize {
        self.pos
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn peek(&self, len: usize) -> Result<u16> {
        let end = self.pos + len;
        if end > self.data.len() {
            return Err(Error::decode(
                self.pos,
                format!(
                    "field of {} chars exceeds payload of {} chars",
                    len,
                    self.data.len()
                ),
            ));
        }
        let field = &self.data[self.pos..end];
        if !field.iter().all(u8::is_ascii_hexdigit) {
            return Err(Error::decode(
                self.pos,
                format!("invalid hex field {:02X?}", field),
            ));
        }
        std::str::from_utf8(field)
            .ok()
            .and_then(|s| u16::from_str_radix(s, 16).ok())
            .ok_or_else(|| Error::decode(self.pos, format!("invalid hex field {:02X?}", field)))
    }

    fn read(&mut self, len: usize) -> Result<u16> {
        let value = self.peek(len)?;
        self.pos += len;
        Ok(value)
    }

    fn peek_u8(&self) -> Result<u8> {
        self.peek(2).map(|v| v as u8)
    }

    fn read_u8(&mut self) -> Result<u8> {
        self.read(2).map(|v| v as u8)
    }

    fn read_u16(&mut self) -> Result<u16> {
        self.read(4)
    }

    fn skip(&mut self, len: usize) {
        self.pos += len;
    }
}

/// Upper bound for a count hint. Counts on the wire are a single byte.
const MAX_COUNT_HINT: usize = u8::MAX as usize;

/// Buffer size for `count` items, using the hint only when it is plausible.
fn buffer_capacity(hint: usize, count: usize) -> usize {
    hint.min(MAX_COUNT_HINT).max(count)
}

/// Per-response parse state. Buffer sizes start from the hints, counts come from the frame.
struct ParseContext {
    hints: ParseHints,
    prev_cells: usize,
}

impl ParseContext {
    fn new(hints: ParseHints) -> Self {
        Self {
            hints,
            prev_cells: hints.cells,
        }
    }
}

/// Some firmware inserts a status byte between pack blocks. A field that neither repeats the
/// previous cell count nor is zero is taken to be that flag.
fn skip_infoflag(cursor: &mut HexCursor, ctx: &ParseContext, n: u8) -> Result<()> {
    if n > 1 {
        let flag = cursor.peek_u8()?;
        if usize::from(flag) != ctx.prev_cells && flag != 0 {
            log::debug!(
                "INFOFLAG detected between packs: 0x{:02X}, skipping 2 chars at offset {}",
                flag,
                cursor.offset()
            );
            cursor.skip(2);
        }
    }
    Ok(())
}

/// A pack whose block could not be decoded. Packs after it are not attempted.
#[derive(Debug)]
pub struct PackFailure {
    pub pack_index: u8,
    pub error: Error,
}

struct PackSet<T> {
    pack_count: u8,
    packs: Vec<T>,
    failure: Option<PackFailure>,
}

fn decode_packs<T>(
    info: &[u8],
    address: PackAddress,
    hints: ParseHints,
    mut decode_pack: impl FnMut(&mut HexCursor, u8, &mut ParseContext) -> Result<T>,
) -> Result<PackSet<T>> {
    let mut cursor = HexCursor::new(info);
    let _data_flag = cursor.read_u8()?;
    let pack_count = cursor.read_u8()?;
    let mut ctx = ParseContext::new(hints);
    let mut packs = Vec::with_capacity(usize::from(pack_count));
    let mut failure = None;

    for n in 1..=pack_count {
        let pack_index = address.pack_index(n);
        let result = skip_infoflag(&mut cursor, &ctx, n)
            .and_then(|_| decode_pack(&mut cursor, pack_index, &mut ctx));
        match result {
            Ok(pack) => packs.push(pack),
            Err(error) => {
                log::warn!("Cannot decode pack {pack_index}: {error}");
                failure = Some(PackFailure { pack_index, error });
                break;
            }
        }
        if cursor.is_at_end() {
            if n < pack_count {
                log::debug!("Payload ended after pack {n} of {pack_count}");
            }
            break;
        }
    }

    Ok(PackSet {
        pack_count,
        packs,
        failure,
    })
}

fn percentage(numerator: u32, denominator: u32, what: &str, offset: usize) -> Result<f32> {
    if denominator == 0 {
        return Err(Error::decode(
            offset,
            format!("{what} undefined, divisor is zero"),
        ));
    }
    let pct = f64::from(numerator) / f64::from(denominator) * 100.0;
    Ok(((pct * 100.0).round() / 100.0) as f32)
}

fn ascii_field(hex_chars: &[u8], offset: usize) -> Result<String> {
    let bytes = hex::decode(hex_chars).map_err(|err| Error::decode(offset, err.to_string()))?;
    Ok(String::from_utf8_lossy(&bytes)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SoftwareVersion {
    pub version: String,
}

impl SoftwareVersion {
    pub fn request() -> Result<Vec<u8>> {
        create_request(Command::SoftwareVersion, Vec::new())
    }

    pub fn decode(info: &[u8]) -> Result<Self> {
        if info.len() % 2 != 0 {
            return Err(Error::decode(info.len(), "odd number of hex chars"));
        }
        Ok(Self {
            version: ascii_field(info, 0)?,
        })
    }
}

const SERIAL_BLOCK_CHARS: usize = 40;
const BMS_SERIAL_CHARS: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerialNumbers {
    pub bms_serial: String,
    pub pack_serials: Vec<String>,
}

impl SerialNumbers {
    pub fn request() -> Result<Vec<u8>> {
        create_request(Command::SerialNumber, Vec::new())
    }

    /// INFO is a sequence of 20 byte blocks: the BMS serial first, then one per pack.
    pub fn decode(info: &[u8]) -> Result<Self> {
        if info.len() % 2 != 0 {
            return Err(Error::decode(info.len(), "odd number of hex chars"));
        }
        if info.len() < BMS_SERIAL_CHARS {
            return Err(Error::decode(
                0,
                format!(
                    "serial number needs {} chars, payload has {}",
                    BMS_SERIAL_CHARS,
                    info.len()
                ),
            ));
        }
        let bms_serial = ascii_field(&info[..BMS_SERIAL_CHARS], 0)?.replace(' ', "");

        let mut pack_serials = Vec::new();
        if info.len() > SERIAL_BLOCK_CHARS {
            for (i, block) in info[SERIAL_BLOCK_CHARS..]
                .chunks_exact(SERIAL_BLOCK_CHARS)
                .enumerate()
            {
                let serial =
                    ascii_field(block, SERIAL_BLOCK_CHARS * (i + 1))?.replace(['\0', ' '], "");
                if !serial.is_empty() {
                    pack_serials.push(serial);
                }
            }
        }

        Ok(Self {
            bms_serial,
            pack_serials,
        })
    }
}

/// Telemetry of one pack from an analog data response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackReading {
    pub pack_index: u8,
    pub cell_voltages_mv: Vec<u16>,
    pub temps_c: Vec<f32>,
    pub current_a: f32, // negative=discharging
    pub voltage_v: f32,
    pub remaining_capacity_mah: u32,
    pub full_capacity_mah: u32,
    pub design_capacity_mah: u32,
    pub cycle_count: u16,
    pub soc_pct: f32,
    pub soh_pct: f32,
}

/// Temperatures are sent in 0.1K with 273.0K encoded as 2730.
fn decode_temperature(raw: u16) -> f32 {
    (i32::from(raw) - 2730) as f32 / 10.0
}

/// 16 bit two's complement in 10mA steps.
fn decode_current(raw: u16) -> f32 {
    let value = if raw >= 32768 {
        i32::from(raw) - 65536
    } else {
        i32::from(raw)
    };
    value as f32 / 100.0
}

fn decode_analog_pack(
    cursor: &mut HexCursor,
    pack_index: u8,
    ctx: &mut ParseContext,
) -> Result<PackReading> {
    let cells = usize::from(cursor.read_u8()?);
    ctx.prev_cells = cells;
    let mut cell_voltages_mv = Vec::with_capacity(buffer_capacity(ctx.hints.cells, cells));
    for i in 0..cells {
        let mv = cursor.read_u16()?;
        log::trace!("Pack #{} cell #{} mV={}", pack_index, i + 1, mv);
        cell_voltages_mv.push(mv);
    }

    let temps = usize::from(cursor.read_u8()?);
    let mut temps_c = Vec::with_capacity(buffer_capacity(ctx.hints.temps, temps));
    for i in 0..temps {
        let temperature = decode_temperature(cursor.read_u16()?);
        log::trace!("Pack #{} sensor #{} °C={}", pack_index, i + 1, temperature);
        temps_c.push(temperature);
    }

    let current_a = decode_current(cursor.read_u16()?);
    let voltage_v = f32::from(cursor.read_u16()?) / 1000.0;
    let remaining_capacity_mah = u32::from(cursor.read_u16()?) * 10;
    let full_capacity_mah = u32::from(cursor.read_u16()?) * 10;
    let soc_pct = percentage(
        remaining_capacity_mah,
        full_capacity_mah,
        "SOC",
        cursor.offset(),
    )?;
    let cycle_count = cursor.read_u16()?;
    let design_capacity_mah = u32::from(cursor.read_u16()?) * 10;
    let soh_pct = percentage(
        full_capacity_mah,
        design_capacity_mah,
        "SOH",
        cursor.offset(),
    )?;

    Ok(PackReading {
        pack_index,
        cell_voltages_mv,
        temps_c,
        current_a,
        voltage_v,
        remaining_capacity_mah,
        full_capacity_mah,
        design_capacity_mah,
        cycle_count,
        soc_pct,
        soh_pct,
    })
}

/// Decoded analog data response. `packs` holds every pack decoded before `failure`.
#[derive(Debug)]
pub struct AnalogData {
    pub pack_count: u8,
    pub packs: Vec<PackReading>,
    pub failure: Option<PackFailure>,
}

impl AnalogData {
    pub fn request(address: PackAddress) -> Result<Vec<u8>> {
        create_request(Command::AnalogData, address.info())
    }

    /// Fails only when the pack count itself cannot be read.
    pub fn decode(info: &[u8], address: PackAddress, hints: ParseHints) -> Result<Self> {
        let set = decode_packs(info, address, hints, decode_analog_pack)?;
        Ok(Self {
            pack_count: set.pack_count,
            packs: set.packs,
            failure: set.failure,
        })
    }
}

/// Capacity summary of the whole battery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackCapacity {
    pub remaining_mah: u32,
    pub full_mah: u32,
    pub design_mah: u32,
    pub soc_pct: f32,
    pub soh_pct: f32,
}

impl PackCapacity {
    pub fn request() -> Result<Vec<u8>> {
        create_request(Command::Capacity, Vec::new())
    }

    pub fn decode(info: &[u8]) -> Result<Self> {
        let mut cursor = HexCursor::new(info);
        let remaining_mah = u32::from(cursor.read_u16()?) * 10;
        let full_mah = u32::from(cursor.read_u16()?) * 10;
        let design_mah = u32::from(cursor.read_u16()?) * 10;
        Ok(Self {
            remaining_mah,
            full_mah,
            design_mah,
            soc_pct: percentage(remaining_mah, full_mah, "SOC", cursor.offset())?,
            soh_pct: percentage(full_mah, design_mah, "SOH", cursor.offset())?,
        })
    }
}

/// Limit state of a single measured value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LimitState {
    Normal,
    BelowLowerLimit,
    AboveUpperLimit,
    OtherFault,
    Unknown(u8),
}

impl From<u8> for LimitState {
    fn from(value: u8) -> Self {
        match value {
            0x00 => LimitState::Normal,
            0x01 => LimitState::BelowLowerLimit,
            0x02 => LimitState::AboveUpperLimit,
            0xF0 => LimitState::OtherFault,
            other => LimitState::Unknown(other),
        }
    }
}

impl fmt::Display for LimitState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LimitState::Normal => write!(f, "normal"),
            LimitState::BelowLowerLimit => write!(f, "below lower limit"),
            LimitState::AboveUpperLimit => write!(f, "above upper limit"),
            LimitState::OtherFault => write!(f, "other fault"),
            LimitState::Unknown(value) => write!(f, "unknown state 0x{value:02X}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Protection {
    CellOvervoltage,
    CellUndervoltage,
    PackOvervoltage,
    PackUndervoltage,
    ChargeOvercurrent,
    DischargeOvercurrent,
    ShortCircuit,
    ChargeHighTemperature,
    DischargeHighTemperature,
    ChargeLowTemperature,
    DischargeLowTemperature,
    MosfetHighTemperature,
    EnvironmentHighTemperature,
    EnvironmentLowTemperature,
    FullyCharged,
}

impl fmt::Display for Protection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Protection::CellOvervoltage => write!(f, "Cell overvoltage protect"),
            Protection::CellUndervoltage => write!(f, "Cell undervoltage protect"),
            Protection::PackOvervoltage => write!(f, "Total voltage overvoltage protect"),
            Protection::PackUndervoltage => write!(f, "Total voltage undervoltage protect"),
            Protection::ChargeOvercurrent => write!(f, "Charge overcurrent protect"),
            Protection::DischargeOvercurrent => write!(f, "Discharge overcurrent protect"),
            Protection::ShortCircuit => write!(f, "Short circuit protect"),
            Protection::ChargeHighTemperature => write!(f, "Charge high temperature protect"),
            Protection::DischargeHighTemperature => {
                write!(f, "Discharge high temperature protect")
            }
            Protection::ChargeLowTemperature => write!(f, "Charge low temperature protect"),
            Protection::DischargeLowTemperature => write!(f, "Discharge low temperature protect"),
            Protection::MosfetHighTemperature => write!(f, "MOS high temperature protect"),
            Protection::EnvironmentHighTemperature => {
                write!(f, "Environment high temperature protect")
            }
            Protection::EnvironmentLowTemperature => {
                write!(f, "Environment low temperature protect")
            }
            Protection::FullyCharged => write!(f, "Fully charged"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Alarm {
    CellOvervoltage,
    CellUndervoltage,
    PackOvervoltage,
    PackUndervoltage,
    ChargeOvercurrent,
    DischargeOvercurrent,
    ChargeHighTemperature,
    DischargeHighTemperature,
    ChargeLowTemperature,
    DischargeLowTemperature,
    EnvironmentHighTemperature,
    EnvironmentLowTemperature,
    MosfetHighTemperature,
    LowCapacity,
}

impl fmt::Display for Alarm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Alarm::CellOvervoltage => write!(f, "Cell overvoltage alarm"),
            Alarm::CellUndervoltage => write!(f, "Cell undervoltage alarm"),
            Alarm::PackOvervoltage => write!(f, "Total voltage overvoltage alarm"),
            Alarm::PackUndervoltage => write!(f, "Total voltage undervoltage alarm"),
            Alarm::ChargeOvercurrent => write!(f, "Charge overcurrent alarm"),
            Alarm::DischargeOvercurrent => write!(f, "Discharge overcurrent alarm"),
            Alarm::ChargeHighTemperature => write!(f, "Charge high temperature alarm"),
            Alarm::DischargeHighTemperature => write!(f, "Discharge high temperature alarm"),
            Alarm::ChargeLowTemperature => write!(f, "Charge low temperature alarm"),
            Alarm::DischargeLowTemperature => write!(f, "Discharge low temperature alarm"),
            Alarm::EnvironmentHighTemperature => write!(f, "Environment high temperature alarm"),
            Alarm::EnvironmentLowTemperature => write!(f, "Environment low temperature alarm"),
            Alarm::MosfetHighTemperature => write!(f, "MOS high temperature alarm"),
            Alarm::LowCapacity => write!(f, "Low capacity alarm"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Fault {
    ChargeMosfet,
    DischargeMosfet,
    TemperatureSensor,
    Cell,
    Sampling,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Fault::ChargeMosfet => write!(f, "Charge MOSFET fault"),
            Fault::DischargeMosfet => write!(f, "Discharge MOSFET fault"),
            Fault::TemperatureSensor => write!(f, "Temperature sensor fault"),
            Fault::Cell => write!(f, "Cell fault"),
            Fault::Sampling => write!(f, "Sampling fault"),
        }
    }
}

/// Instruction state byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SystemState {
    pub current_limit: bool,
    pub charge_fet: bool,
    pub discharge_fet: bool,
    pub pack_indicate: bool,
    pub reverse: bool,
    pub ac_in: bool,
    pub heart: bool,
}

impl From<u8> for SystemState {
    fn from(byte: u8) -> Self {
        Self {
            current_limit: read_bit!(byte, 0),
            charge_fet: read_bit!(byte, 1),
            discharge_fet: read_bit!(byte, 2),
            pack_indicate: read_bit!(byte, 3),
            reverse: read_bit!(byte, 4),
            ac_in: read_bit!(byte, 5),
            heart: read_bit!(byte, 7),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackWarnings {
    pub pack_index: u8,
    pub cells: Vec<LimitState>,
    pub temps: Vec<LimitState>,
    pub charge_current: LimitState,
    pub total_voltage: LimitState,
    pub discharge_current: LimitState,
    pub protections: Vec<Protection>,
    pub system: SystemState,
    pub control_state: u8,
    pub faults: Vec<Fault>,
    /// Balancing flag per cell.
    pub balancing: Vec<bool>,
    pub alarms: Vec<Alarm>,
}

impl PackWarnings {
    pub fn has_protection(&self, protection: Protection) -> bool {
        self.protections.contains(&protection)
    }

    /// Human readable list of everything that is not normal, empty when all is well.
    pub fn summary(&self) -> String {
        let mut items = Vec::new();
        for (i, state) in self.cells.iter().enumerate() {
            if *state != LimitState::Normal {
                items.push(format!("cell {} {}", i + 1, state));
            }
        }
        for (i, state) in self.temps.iter().enumerate() {
            if *state != LimitState::Normal {
                items.push(format!("temp {} {}", i + 1, state));
            }
        }
        for (name, state) in [
            ("charge current", self.charge_current),
            ("total voltage", self.total_voltage),
            ("discharge current", self.discharge_current),
        ] {
            if state != LimitState::Normal {
                items.push(format!("{name} {state}"));
            }
        }
        items.extend(self.protections.iter().map(ToString::to_string));
        items.extend(self.faults.iter().map(ToString::to_string));
        items.extend(self.alarms.iter().map(ToString::to_string));
        items.join(", ")
    }
}

fn decode_warning_pack(
    cursor: &mut HexCursor,
    pack_index: u8,
    ctx: &mut ParseContext,
) -> Result<PackWarnings> {
    let n_cells = usize::from(cursor.read_u8()?);
    ctx.prev_cells = n_cells;
    let mut cells = Vec::with_capacity(buffer_capacity(ctx.hints.cells, n_cells));
    for _ in 0..n_cells {
        cells.push(LimitState::from(cursor.read_u8()?));
    }
    let n_temps = usize::from(cursor.read_u8()?);
    let mut temps = Vec::with_capacity(buffer_capacity(ctx.hints.temps, n_temps));
    for _ in 0..n_temps {
        temps.push(LimitState::from(cursor.read_u8()?));
    }
    let charge_current = LimitState::from(cursor.read_u8()?);
    let total_voltage = LimitState::from(cursor.read_u8()?);
    let discharge_current = LimitState::from(cursor.read_u8()?);

    let protect_state_1 = cursor.read_u8()?;
    let protect_state_2 = cursor.read_u8()?;
    let system = SystemState::from(cursor.read_u8()?);
    let control_state = cursor.read_u8()?;
    let fault_state = cursor.read_u8()?;
    let balance_state_1 = cursor.read_u8()?;
    let balance_state_2 = cursor.read_u8()?;
    let warn_state_1 = cursor.read_u8()?;
    let warn_state_2 = cursor.read_u8()?;

    let mut protections = Vec::new();
    macro_rules! ck_and_add {
        ($list:ident, $byte:expr, $position:expr, $enum_type:expr) => {
            if read_bit!($byte, $position) {
                $list.push($enum_type);
            }
        };
    }
    ck_and_add!(protections, protect_state_1, 0, Protection::CellOvervoltage);
    ck_and_add!(protections, protect_state_1, 1, Protection::CellUndervoltage);
    ck_and_add!(protections, protect_state_1, 2, Protection::PackOvervoltage);
    ck_and_add!(protections, protect_state_1, 3, Protection::PackUndervoltage);
    ck_and_add!(protections, protect_state_1, 4, Protection::ChargeOvercurrent);
    ck_and_add!(protections, protect_state_1, 5, Protection::DischargeOvercurrent);
    ck_and_add!(protections, protect_state_1, 6, Protection::ShortCircuit);

    ck_and_add!(protections, protect_state_2, 0, Protection::ChargeHighTemperature);
    ck_and_add!(protections, protect_state_2, 1, Protection::DischargeHighTemperature);
    ck_and_add!(protections, protect_state_2, 2, Protection::ChargeLowTemperature);
    ck_and_add!(protections, protect_state_2, 3, Protection::DischargeLowTemperature);
    ck_and_add!(protections, protect_state_2, 4, Protection::MosfetHighTemperature);
    ck_and_add!(protections, protect_state_2, 5, Protection::EnvironmentHighTemperature);
    ck_and_add!(protections, protect_state_2, 6, Protection::EnvironmentLowTemperature);
    ck_and_add!(protections, protect_state_2, 7, Protection::FullyCharged);

    let mut faults = Vec::new();
    ck_and_add!(faults, fault_state, 0, Fault::ChargeMosfet);
    ck_and_add!(faults, fault_state, 1, Fault::DischargeMosfet);
    ck_and_add!(faults, fault_state, 2, Fault::TemperatureSensor);
    ck_and_add!(faults, fault_state, 4, Fault::Cell);
    ck_and_add!(faults, fault_state, 5, Fault::Sampling);

    let mut alarms = Vec::new();
    ck_and_add!(alarms, warn_state_1, 0, Alarm::CellOvervoltage);
    ck_and_add!(alarms, warn_state_1, 1, Alarm::CellUndervoltage);
    ck_and_add!(alarms, warn_state_1, 2, Alarm::PackOvervoltage);
    ck_and_add!(alarms, warn_state_1, 3, Alarm::PackUndervoltage);
    ck_and_add!(alarms, warn_state_1, 4, Alarm::ChargeOvercurrent);
    ck_and_add!(alarms, warn_state_1, 5, Alarm::DischargeOvercurrent);

    ck_and_add!(alarms, warn_state_2, 0, Alarm::ChargeHighTemperature);
    ck_and_add!(alarms, warn_state_2, 1, Alarm::DischargeHighTemperature);
    ck_and_add!(alarms, warn_state_2, 2, Alarm::ChargeLowTemperature);
    ck_and_add!(alarms, warn_state_2, 3, Alarm::DischargeLowTemperature);
    ck_and_add!(alarms, warn_state_2, 4, Alarm::EnvironmentHighTemperature);
    ck_and_add!(alarms, warn_state_2, 5, Alarm::EnvironmentLowTemperature);
    ck_and_add!(alarms, warn_state_2, 6, Alarm::MosfetHighTemperature);
    ck_and_add!(alarms, warn_state_2, 7, Alarm::LowCapacity);

    // balance state 1 covers cells 1-8, balance state 2 cells 9-16
    let balancing = (0..n_cells.min(16))
        .map(|i| {
            if i < 8 {
                read_bit!(balance_state_1, i)
            } else {
                read_bit!(balance_state_2, i - 8)
            }
        })
        .collect();

    Ok(PackWarnings {
        pack_index,
        cells,
        temps,
        charge_current,
        total_voltage,
        discharge_current,
        protections,
        system,
        control_state,
        faults,
        balancing,
        alarms,
    })
}

#[derive(Debug)]
pub struct WarningInfo {
    pub pack_count: u8,
    pub packs: Vec<PackWarnings>,
    pub failure: Option<PackFailure>,
}

impl WarningInfo {
    pub fn request(address: PackAddress) -> Result<Vec<u8>> {
        create_request(Command::WarningInfo, address.info())
    }

    pub fn decode(info: &[u8], address: PackAddress, hints: ParseHints) -> Result<Self> {
        let set = decode_packs(info, address, hints, decode_warning_pack)?;
        Ok(Self {
            pack_count: set.pack_count,
            packs: set.packs,
            failure: set.failure,
        })
    }
}
