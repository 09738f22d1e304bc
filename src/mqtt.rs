use crate::config::Options;
use anyhow::{Context, Result};
use pacebms_lib::session::Publisher;
use pacebms_lib::state::BatteryState;
use pacebms_lib::telemetry;
use rumqttc::{Client, ConnectReturnCode, Event, LastWill, MqttOptions, Packet, QoS};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const AVAILABILITY_TOPIC: &str = "availability";
const LAST_UPDATE_TOPIC: &str = "last_update";
const REQUEST_CAPACITY: usize = 256;

fn generate_random_string(len: usize) -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;

    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Home Assistant component, unit and device class for a telemetry topic.
fn sensor_kind(topic: &str) -> (&'static str, Option<&'static str>, Option<&'static str>) {
    let leaf = topic.rsplit('/').next().unwrap_or(topic);
    if topic.contains("/v_cells/") {
        ("sensor", Some("mV"), Some("voltage"))
    } else if topic.contains("/temps/") {
        ("sensor", Some("°C"), Some("temperature"))
    } else {
        match leaf {
            "i_pack" => ("sensor", Some("A"), Some("current")),
            "v_pack" => ("sensor", Some("V"), Some("voltage")),
            "soc" | "pack_soc" => ("sensor", Some("%"), Some("battery")),
            "soh" | "pack_soh" => ("sensor", Some("%"), None),
            leaf if leaf.ends_with("_cap") => ("sensor", Some("mAh"), None),
            "prot_short_circuit" | "prot_discharge_current" | "prot_charge_current" | "fully"
            | "current_limit" | "charge_fet" | "discharge_fet" | "pack_indicate" | "reverse"
            | "ac_in" | "heart" => ("binary_sensor", None, None),
            _ => ("sensor", None, None),
        }
    }
}

/// Discovery config topics and payloads for every topic the current state publishes.
fn discovery_configs(
    base_topic: &str,
    prefix: &str,
    state: &BatteryState,
) -> Vec<(String, Value)> {
    let node_id = if state.bms_serial.is_empty() {
        base_topic.replace(['/', ' '], "_")
    } else {
        format!("{}_{}", base_topic.replace(['/', ' '], "_"), state.bms_serial)
    };
    let device = json!({
        "identifiers": [node_id],
        "name": "Pace BMS",
        "manufacturer": "PACE",
        "model": "Pace BMS",
        "sw_version": state.version,
    });
    telemetry::snapshot(state)
        .into_iter()
        .map(|(topic, _)| {
            let object_id = topic.replace('/', "_");
            let (component, unit, device_class) = sensor_kind(&topic);
            let mut config = json!({
                "name": object_id.replace('_', " "),
                "unique_id": format!("{node_id}_{object_id}"),
                "state_topic": format!("{base_topic}/{topic}"),
                "availability_topic": format!("{base_topic}/{AVAILABILITY_TOPIC}"),
                "device": device,
            });
            if let Some(map) = config.as_object_mut() {
                if let Some(unit) = unit {
                    map.insert("unit_of_measurement".into(), json!(unit));
                    map.insert("state_class".into(), json!("measurement"));
                }
                if let Some(device_class) = device_class {
                    map.insert("device_class".into(), json!(device_class));
                }
                if component == "binary_sensor" {
                    map.insert("payload_on".into(), json!("ON"));
                    map.insert("payload_off".into(), json!("OFF"));
                }
            }
            (
                format!("{prefix}/{component}/{node_id}/{object_id}/config"),
                config,
            )
        })
        .collect()
}

pub struct MqttPublisher {
    client: Client,
    connected: Arc<AtomicBool>,
    base_topic: String,
    discovery_prefix: Option<String>,
    _notifications: JoinHandle<()>,
}

impl MqttPublisher {
    pub fn new(options: &Options) -> Result<Self> {
        let client_id = format!("pacebms-{}", generate_random_string(8));
        let base_topic = options.mqtt_base_topic.trim_end_matches('/').to_string();

        let mut mqtt_options = MqttOptions::new(&client_id, &options.mqtt_host, options.mqtt_port);
        mqtt_options.set_keep_alive(Duration::from_secs(60));
        mqtt_options.set_clean_session(true);
        if let Some((user, password)) = options.mqtt_credentials() {
            mqtt_options.set_credentials(user, password);
        }
        mqtt_options.set_last_will(LastWill::new(
            format!("{base_topic}/{AVAILABILITY_TOPIC}"),
            "offline",
            QoS::AtLeastOnce,
            true,
        ));

        log::info!(
            "Connecting to MQTT broker: {}:{} with client_id: {client_id}",
            options.mqtt_host,
            options.mqtt_port
        );
        let (client, mut connection) = Client::new(mqtt_options, REQUEST_CAPACITY);

        let connected = Arc::new(AtomicBool::new(false));
        let flag = connected.clone();
        let notifications = std::thread::Builder::new()
            .name("mqtt".into())
            .spawn(move || {
                for notification in connection.iter() {
                    match notification {
                        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                            let success = ack.code == ConnectReturnCode::Success;
                            if success {
                                log::info!("MQTT connected");
                            } else {
                                log::error!("MQTT connection refused: {:?}", ack.code);
                            }
                            flag.store(success, Ordering::SeqCst);
                        }
                        Ok(Event::Incoming(Packet::Disconnect)) => {
                            log::warn!("MQTT disconnected by broker");
                            flag.store(false, Ordering::SeqCst);
                        }
                        Ok(event) => log::trace!("MQTT event: {event:?}"),
                        Err(err) => {
                            if flag.swap(false, Ordering::SeqCst) {
                                log::warn!("MQTT disconnected: {err}");
                            } else {
                                log::debug!("MQTT connection error: {err}");
                            }
                            std::thread::sleep(Duration::from_secs(1));
                        }
                    }
                }
                log::debug!("MQTT notification loop finished");
            })
            .with_context(|| "Cannot spawn MQTT notification thread")?;

        Ok(Self {
            client,
            connected,
            base_topic,
            discovery_prefix: options
                .mqtt_ha_discovery
                .then(|| options.mqtt_ha_discovery_topic.trim_end_matches('/').to_string()),
            _notifications: notifications,
        })
    }

    fn topic(&self, suffix: &str) -> String {
        format!("{}/{suffix}", self.base_topic)
    }

    fn send(&mut self, topic: String, payload: String, retain: bool) {
        log::debug!("Publishing to MQTT: Topic='{topic}', Payload='{payload}'");
        if let Err(err) = self
            .client
            .try_publish(&topic, QoS::AtMostOnce, retain, payload)
        {
            log::error!("Failed to publish message to topic {topic}: {err}");
        }
    }

    pub fn set_availability(&mut self, online: bool) {
        let payload = if online { "online" } else { "offline" };
        self.send(self.topic(AVAILABILITY_TOPIC), payload.to_string(), true);
    }

    /// Marks the bridge offline and closes the broker session.
    pub fn shutdown(&mut self) {
        if self.is_connected() {
            self.set_availability(false);
        }
        if let Err(err) = self.client.try_disconnect() {
            log::debug!("MQTT disconnect failed: {err}");
        }
    }
}

impl Publisher for MqttPublisher {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish(&mut self, topic: &str, payload: &str) {
        self.send(self.topic(topic), payload.to_string(), false);
    }

    fn announce(&mut self, state: &BatteryState) {
        if let Some(prefix) = &self.discovery_prefix {
            let configs = discovery_configs(&self.base_topic, prefix, state);
            log::info!("Publishing {} Home Assistant discovery configs", configs.len());
            for (topic, config) in configs {
                self.send(topic, config.to_string(), true);
            }
        }
        self.set_availability(true);
    }

    fn cycle_complete(&mut self, _state: &BatteryState) {
        let now = chrono::Local::now().to_rfc3339();
        self.send(self.topic(LAST_UPDATE_TOPIC), now, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacebms_lib::protocol::PackReading;

    fn state() -> BatteryState {
        let mut state = BatteryState::default();
        state.version = "PACE_V1.2".into();
        state.bms_serial = "SN0001".into();
        state.packs.insert(
            1,
            PackReading {
                pack_index: 1,
                cell_voltages_mv: vec![3300],
                temps_c: vec![25.0],
                current_a: 1.5,
                voltage_v: 52.8,
                remaining_capacity_mah: 5000,
                full_capacity_mah: 10000,
                design_capacity_mah: 10000,
                cycle_count: 3,
                soc_pct: 50.0,
                soh_pct: 100.0,
            },
        );
        state
    }

    #[test]
    fn kinds() {
        assert_eq!(
            sensor_kind("pack_1/v_cells/cell_3"),
            ("sensor", Some("mV"), Some("voltage"))
        );
        assert_eq!(sensor_kind("pack_2/temps/temp_1").2, Some("temperature"));
        assert_eq!(sensor_kind("pack_1/i_remain_cap").1, Some("mAh"));
        assert_eq!(sensor_kind("pack_full_cap").1, Some("mAh"));
        assert_eq!(sensor_kind("pack_1/charge_fet").0, "binary_sensor");
        assert_eq!(sensor_kind("pack_1/warnings"), ("sensor", None, None));
        assert_eq!(sensor_kind("bms_version"), ("sensor", None, None));
    }

    #[test]
    fn discovery() {
        let configs = discovery_configs("bmspace", "homeassistant", &state());
        let (topic, config) = configs
            .iter()
            .find(|(topic, _)| topic.contains("pack_1_v_cells_cell_1"))
            .unwrap();
        assert_eq!(
            topic,
            "homeassistant/sensor/bmspace_SN0001/pack_1_v_cells_cell_1/config"
        );
        assert_eq!(config["state_topic"], "bmspace/pack_1/v_cells/cell_1");
        assert_eq!(config["availability_topic"], "bmspace/availability");
        assert_eq!(config["unit_of_measurement"], "mV");
        assert_eq!(config["unique_id"], "bmspace_SN0001_pack_1_v_cells_cell_1");
        assert_eq!(config["device"]["sw_version"], "PACE_V1.2");
        assert_eq!(configs.len(), telemetry::snapshot(&state()).len());
    }
}
