//! In-memory view of the most recently decoded telemetry.

use crate::protocol::{
    AnalogData, PackCapacity, PackReading, PackWarnings, SerialNumbers, WarningInfo,
};
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_CELLS: usize = 16;
pub const DEFAULT_TEMPS: usize = 6;

/// Cell and sensor counts used to size buffers for the next parse.
/// The counts embedded in a frame always take precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParseHints {
    pub cells: usize,
    pub temps: usize,
}

impl Default for ParseHints {
    fn default() -> Self {
        Self {
            cells: DEFAULT_CELLS,
            temps: DEFAULT_TEMPS,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatteryState {
    pub version: String,
    pub bms_serial: String,
    pub pack_serials: Vec<String>,
    pub packs: BTreeMap<u8, PackReading>,
    pub capacity: Option<PackCapacity>,
    pub warnings: BTreeMap<u8, PackWarnings>,
    pub hints: ParseHints,
}

impl BatteryState {
    pub fn new(hints: ParseHints) -> Self {
        Self {
            hints,
            ..Default::default()
        }
    }

    pub fn apply_serials(&mut self, serials: SerialNumbers) {
        self.bms_serial = serials.bms_serial;
        self.pack_serials = serials.pack_serials;
    }

    /// Stores every pack that decoded successfully. A failed pack keeps its previous reading.
    pub fn apply_analog(&mut self, data: &AnalogData) {
        for pack in &data.packs {
            self.packs.insert(pack.pack_index, pack.clone());
        }
        if let Some(last) = data.packs.last() {
            self.hints = ParseHints {
                cells: last.cell_voltages_mv.len(),
                temps: last.temps_c.len(),
            };
        }
    }

    pub fn apply_capacity(&mut self, capacity: PackCapacity) {
        self.capacity = Some(capacity);
    }

    pub fn apply_warnings(&mut self, info: &WarningInfo) {
        for pack in &info.packs {
            self.warnings.insert(pack.pack_index, pack.clone());
        }
    }

    pub fn pack_count(&self) -> usize {
        self.packs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::protocol::PackFailure;

    fn reading(pack_index: u8, cells: usize, temps: usize) -> PackReading {
        PackReading {
            pack_index,
            cell_voltages_mv: vec![3300; cells],
            temps_c: vec![21.5; temps],
            current_a: 1.0,
            voltage_v: 52.8,
            remaining_capacity_mah: 50000,
            full_capacity_mah: 100000,
            design_capacity_mah: 100000,
            cycle_count: 12,
            soc_pct: 50.0,
            soh_pct: 100.0,
        }
    }

    #[test]
    fn failed_pack_keeps_previous_reading() {
        let mut state = BatteryState::new(ParseHints::default());
        state.apply_analog(&AnalogData {
            pack_count: 2,
            packs: vec![reading(1, 16, 6), reading(2, 16, 6)],
            failure: None,
        });

        let mut newer = reading(1, 15, 4);
        newer.current_a = -3.2;
        state.apply_analog(&AnalogData {
            pack_count: 2,
            packs: vec![newer],
            failure: Some(PackFailure {
                pack_index: 2,
                error: Error::decode(120, "truncated"),
            }),
        });

        assert_eq!(state.pack_count(), 2);
        assert_eq!(state.packs[&1].current_a, -3.2);
        assert_eq!(state.packs[&2].current_a, 1.0);
        assert_eq!(state.hints, ParseHints { cells: 15, temps: 4 });
    }

    #[test]
    fn hints_untouched_without_packs() {
        let hints = ParseHints { cells: 8, temps: 2 };
        let mut state = BatteryState::new(hints);
        state.apply_analog(&AnalogData {
            pack_count: 0,
            packs: Vec::new(),
            failure: None,
        });
        assert_eq!(state.hints, hints);
    }
}
