//! Connection state machine and polling cadence.
//!
//! A [`Session`] owns the BMS link and the [`BatteryState`]. Each call to
//! [`Session::tick`] performs one scheduled step: a single reconnect attempt while the link is
//! down, or one full poll cycle (analog data, capacity, warnings, spread over the scan
//! interval) while it is up and the message bus is reachable.

use crate::client::PaceBms;
use crate::error::{Error, Result};
use crate::protocol::{AnalogData, PackAddress, WarningInfo};
use crate::state::{BatteryState, ParseHints};
use crate::telemetry::{self, Telemetry};
use crate::transport::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound on how long a raised stop flag goes unnoticed while waiting.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Receives decoded telemetry. Implemented by the message bus side.
pub trait Publisher {
    /// Whether the bus link is up. Sampled before every poll cycle.
    fn is_connected(&self) -> bool;
    fn publish(&mut self, topic: &str, payload: &str);
    /// Called once after the first successful cycle following a (re)connect.
    fn announce(&mut self, state: &BatteryState);
    /// Called after every completed poll cycle.
    fn cycle_complete(&mut self, _state: &BatteryState) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub scan_interval: Duration,
    pub hints: ParseHints,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(5),
            hints: ParseHints::default(),
        }
    }
}

pub struct Session<T: Transport, P: Publisher> {
    bms: PaceBms<T>,
    publisher: P,
    state: BatteryState,
    connection: ConnectionState,
    scan_interval: Duration,
    initial: bool,
    stop: Arc<AtomicBool>,
}

impl<T: Transport, P: Publisher> Session<T, P> {
    pub fn new(bms: PaceBms<T>, publisher: P, config: SessionConfig) -> Self {
        Self {
            bms,
            publisher,
            state: BatteryState::new(config.hints),
            connection: ConnectionState::Disconnected,
            scan_interval: config.scan_interval,
            initial: true,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that ends [`Session::run`] once set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn state(&self) -> &BatteryState {
        &self.state
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn publisher_mut(&mut self) -> &mut P {
        &mut self.publisher
    }

    fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Sleeps for `duration` unless stopped first. Returns false when stopped.
    fn wait(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        while !self.is_stopped() {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(STOP_POLL_INTERVAL));
        }
        false
    }

    pub fn run(&mut self) {
        log::info!(
            "Starting session: scan_interval={:?}",
            self.scan_interval
        );
        while !self.is_stopped() {
            self.tick();
        }
        self.bms.close();
        self.connection = ConnectionState::Disconnected;
        log::info!("Session stopped");
    }

    pub fn tick(&mut self) {
        match self.connection {
            ConnectionState::Disconnected | ConnectionState::Connecting => self.connect(),
            ConnectionState::Connected => {
                if self.publisher.is_connected() {
                    self.poll_cycle();
                } else {
                    log::debug!("Message bus not connected, skipping poll");
                    self.wait(self.scan_interval);
                }
            }
        }
    }

    fn connect(&mut self) {
        self.connection = ConnectionState::Connecting;
        match self.bms.connect() {
            Ok(()) => {
                log::info!("BMS connected");
                self.connection = ConnectionState::Connected;
                self.initial = true;
                self.fetch_identity();
            }
            Err(err) => {
                log::error!("BMS connection error: {err}");
                self.connection = ConnectionState::Disconnected;
                self.wait(self.scan_interval);
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    fn disconnect(&mut self, err: &Error) {
        log::warn!("BMS link lost: {err}");
        self.bms.close();
        self.connection = ConnectionState::Disconnected;
    }

    /// Logs and swallows decode failures, drops the link on I/O failures.
    fn check<V>(&mut self, what: &str, result: Result<V>) -> Option<V> {
        match result {
            Ok(value) => Some(value),
            Err(err) if err.is_connection() => {
                self.disconnect(&err);
                None
            }
            Err(err) => {
                log::warn!("Cannot get {what}: {err}");
                None
            }
        }
    }

    fn publish_all(&mut self, telemetry: Telemetry) {
        for (topic, value) in telemetry {
            self.publisher.publish(&topic, &value);
        }
    }

    fn fetch_identity(&mut self) {
        let result = self.bms.get_version();
        if let Some(version) = self.check("version", result) {
            log::info!("BMS version: {}", version.version);
            self.state.version = version.version;
        }
        if !self.is_connected() {
            return;
        }
        let result = self.bms.get_serial_numbers();
        if let Some(serials) = self.check("serial numbers", result) {
            log::info!(
                "BMS serial: {} pack serials: {:?}",
                serials.bms_serial,
                serials.pack_serials
            );
            self.state.apply_serials(serials);
        }
        self.publish_all(telemetry::identity(&self.state));
    }

    fn apply_analog(&mut self, data: AnalogData) -> bool {
        if self.initial {
            for pack in &data.packs {
                log::info!(
                    "Pack {}, total cells: {}, temperature sensors: {}",
                    pack.pack_index,
                    pack.cell_voltages_mv.len(),
                    pack.temps_c.len()
                );
            }
        }
        self.state.apply_analog(&data);
        for pack in &data.packs {
            log::debug!("{pack:?}");
            self.publish_all(telemetry::pack(pack));
        }
        !data.packs.is_empty()
    }

    fn apply_warnings(&mut self, info: WarningInfo) {
        self.state.apply_warnings(&info);
        for pack in &info.packs {
            let summary = pack.summary();
            if !summary.is_empty() {
                log::warn!("Pack {} warnings: {}", pack.pack_index, summary);
            }
            self.publish_all(telemetry::warnings(pack));
        }
    }

    fn poll_cycle(&mut self) {
        let third = self.scan_interval / 3;

        let result = self
            .bms
            .get_analog_data(PackAddress::All, self.state.hints);
        let analog_ok = match self.check("analog data", result) {
            Some(data) => self.apply_analog(data),
            None => false,
        };
        if !self.is_connected() || !self.wait(third) {
            return;
        }

        let result = self.bms.get_capacity();
        if let Some(capacity) = self.check("pack capacity", result) {
            self.publish_all(telemetry::capacity(&capacity));
            self.state.apply_capacity(capacity);
        }
        if !self.is_connected() || !self.wait(third) {
            return;
        }

        let result = self.bms.get_warnings(PackAddress::All, self.state.hints);
        if let Some(info) = self.check("warnings", result) {
            self.apply_warnings(info);
        }
        if !self.is_connected() || !self.wait(self.scan_interval - third * 2) {
            return;
        }

        if analog_ok && self.initial {
            log::info!("Initial poll complete, announcing {} packs", self.state.pack_count());
            self.publisher.announce(&self.state);
            self.initial = false;
        }
        self.publisher.cycle_complete(&self.state);
    }
}
