//! Flattens decoded records into `(topic, value)` pairs. Topics are relative to the
//! publisher's base topic.

use crate::protocol::{PackCapacity, PackReading, PackWarnings, Protection};
use crate::state::BatteryState;

pub type Telemetry = Vec<(String, String)>;

fn on_off(value: bool) -> String {
    if value { "ON" } else { "OFF" }.to_string()
}

pub fn identity(state: &BatteryState) -> Telemetry {
    vec![
        ("bms_version".to_string(), state.version.clone()),
        ("bms_sn".to_string(), state.bms_serial.clone()),
        ("pack_sn".to_string(), state.pack_serials.join(",")),
    ]
}

pub fn pack(reading: &PackReading) -> Telemetry {
    let p = reading.pack_index;
    let mut telemetry =
        Vec::with_capacity(reading.cell_voltages_mv.len() + reading.temps_c.len() + 9);
    for (i, mv) in reading.cell_voltages_mv.iter().enumerate() {
        telemetry.push((format!("pack_{p}/v_cells/cell_{}", i + 1), mv.to_string()));
    }
    for (i, temperature) in reading.temps_c.iter().enumerate() {
        telemetry.push((
            format!("pack_{p}/temps/temp_{}", i + 1),
            format!("{temperature:.1}"),
        ));
    }
    telemetry.extend([
        (format!("pack_{p}/i_pack"), reading.current_a.to_string()),
        (format!("pack_{p}/v_pack"), reading.voltage_v.to_string()),
        (
            format!("pack_{p}/i_remain_cap"),
            reading.remaining_capacity_mah.to_string(),
        ),
        (
            format!("pack_{p}/i_full_cap"),
            reading.full_capacity_mah.to_string(),
        ),
        (
            format!("pack_{p}/i_design_cap"),
            reading.design_capacity_mah.to_string(),
        ),
        (format!("pack_{p}/soc"), reading.soc_pct.to_string()),
        (format!("pack_{p}/soh"), reading.soh_pct.to_string()),
        (format!("pack_{p}/cycles"), reading.cycle_count.to_string()),
    ]);
    telemetry
}

pub fn capacity(capacity: &PackCapacity) -> Telemetry {
    vec![
        ("pack_remain_cap".to_string(), capacity.remaining_mah.to_string()),
        ("pack_full_cap".to_string(), capacity.full_mah.to_string()),
        ("pack_design_cap".to_string(), capacity.design_mah.to_string()),
        ("pack_soc".to_string(), capacity.soc_pct.to_string()),
        ("pack_soh".to_string(), capacity.soh_pct.to_string()),
    ]
}

pub fn warnings(warnings: &PackWarnings) -> Telemetry {
    let p = warnings.pack_index;
    let balancing = warnings
        .balancing
        .iter()
        .enumerate()
        .filter(|(_, active)| **active)
        .map(|(i, _)| (i + 1).to_string())
        .collect::<Vec<_>>()
        .join(",");
    let system = &warnings.system;
    vec![
        (format!("pack_{p}/warnings"), warnings.summary()),
        (format!("pack_{p}/balancing"), balancing),
        (
            format!("pack_{p}/prot_short_circuit"),
            on_off(warnings.has_protection(Protection::ShortCircuit)),
        ),
        (
            format!("pack_{p}/prot_discharge_current"),
            on_off(warnings.has_protection(Protection::DischargeOvercurrent)),
        ),
        (
            format!("pack_{p}/prot_charge_current"),
            on_off(warnings.has_protection(Protection::ChargeOvercurrent)),
        ),
        (
            format!("pack_{p}/fully"),
            on_off(warnings.has_protection(Protection::FullyCharged)),
        ),
        (format!("pack_{p}/current_limit"), on_off(system.current_limit)),
        (format!("pack_{p}/charge_fet"), on_off(system.charge_fet)),
        (format!("pack_{p}/discharge_fet"), on_off(system.discharge_fet)),
        (format!("pack_{p}/pack_indicate"), on_off(system.pack_indicate)),
        (format!("pack_{p}/reverse"), on_off(system.reverse)),
        (format!("pack_{p}/ac_in"), on_off(system.ac_in)),
        (format!("pack_{p}/heart"), on_off(system.heart)),
    ]
}

/// Everything currently known, in publishing order.
pub fn snapshot(state: &BatteryState) -> Telemetry {
    let mut telemetry = identity(state);
    for reading in state.packs.values() {
        telemetry.extend(pack(reading));
    }
    if let Some(c) = &state.capacity {
        telemetry.extend(capacity(c));
    }
    for w in state.warnings.values() {
        telemetry.extend(warnings(w));
    }
    telemetry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{LimitState, SystemState};

    #[test]
    fn pack_topics() {
        let reading = PackReading {
            pack_index: 2,
            cell_voltages_mv: vec![3300, 3301],
            temps_c: vec![0.4],
            current_a: -0.01,
            voltage_v: 52.812,
            remaining_capacity_mah: 5000,
            full_capacity_mah: 10000,
            design_capacity_mah: 10000,
            cycle_count: 16,
            soc_pct: 50.0,
            soh_pct: 100.0,
        };
        let telemetry = pack(&reading);
        assert_eq!(telemetry[0], ("pack_2/v_cells/cell_1".into(), "3300".into()));
        assert_eq!(telemetry[1], ("pack_2/v_cells/cell_2".into(), "3301".into()));
        assert_eq!(telemetry[2], ("pack_2/temps/temp_1".into(), "0.4".into()));
        assert!(telemetry.contains(&("pack_2/i_pack".into(), "-0.01".into())));
        assert!(telemetry.contains(&("pack_2/v_pack".into(), "52.812".into())));
        assert!(telemetry.contains(&("pack_2/soc".into(), "50".into())));
        assert!(telemetry.contains(&("pack_2/cycles".into(), "16".into())));
    }

    #[test]
    fn warning_topics() {
        let w = PackWarnings {
            pack_index: 1,
            cells: vec![LimitState::Normal; 3],
            temps: vec![],
            charge_current: LimitState::Normal,
            total_voltage: LimitState::Normal,
            discharge_current: LimitState::Normal,
            protections: vec![Protection::FullyCharged],
            system: SystemState {
                charge_fet: true,
                ..Default::default()
            },
            control_state: 0,
            faults: vec![],
            balancing: vec![true, false, true],
            alarms: vec![],
        };
        let telemetry = warnings(&w);
        assert!(telemetry.contains(&("pack_1/warnings".into(), "Fully charged".into())));
        assert!(telemetry.contains(&("pack_1/balancing".into(), "1,3".into())));
        assert!(telemetry.contains(&("pack_1/fully".into(), "ON".into())));
        assert!(telemetry.contains(&("pack_1/charge_fet".into(), "ON".into())));
        assert!(telemetry.contains(&("pack_1/discharge_fet".into(), "OFF".into())));
    }
}
