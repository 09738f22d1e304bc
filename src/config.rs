use anyhow::{bail, Context, Result};
use pacebms_lib::state::{ParseHints, DEFAULT_CELLS, DEFAULT_TEMPS};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Cell and sensor counts are a single byte on the wire.
const MAX_COUNT: usize = u8::MAX as usize;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub enum ConnectionType {
    Serial,
    Socket,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Options {
    #[serde(default = "Options::default_scan_interval")]
    pub scan_interval: u64,
    pub connection_type: ConnectionType,
    #[serde(default)]
    pub bms_serial: String,
    #[serde(default)]
    pub bms_ip: String,
    #[serde(default)]
    pub bms_port: u16,
    pub mqtt_host: String,
    #[serde(default = "Options::default_mqtt_port")]
    pub mqtt_port: u16,
    #[serde(default)]
    pub mqtt_user: Option<String>,
    #[serde(default)]
    pub mqtt_password: Option<String>,
    #[serde(default = "Options::default_base_topic")]
    pub mqtt_base_topic: String,
    #[serde(default = "Options::default_ha_discovery")]
    pub mqtt_ha_discovery: bool,
    #[serde(default = "Options::default_ha_discovery_topic")]
    pub mqtt_ha_discovery_topic: String,
    #[serde(default)]
    pub debug_output: bool,
    #[serde(default = "Options::default_cells")]
    pub default_cells: usize,
    #[serde(default = "Options::default_temps")]
    pub default_temps: usize,
}

impl Options {
    pub const ADDON_OPTIONS_FILE: &'static str = "/data/options.json";
    pub const DEFAULT_CONFIG_FILE: &'static str = "config.yaml";

    fn default_scan_interval() -> u64 {
        5
    }

    fn default_mqtt_port() -> u16 {
        1883
    }

    fn default_base_topic() -> String {
        "bmspace".into()
    }

    fn default_ha_discovery() -> bool {
        true
    }

    fn default_ha_discovery_topic() -> String {
        "homeassistant".into()
    }

    fn default_cells() -> usize {
        DEFAULT_CELLS
    }

    fn default_temps() -> usize {
        DEFAULT_TEMPS
    }

    /// Loads `config_file` if given, otherwise the add-on options file or `config.yaml`.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let path = match config_file {
            Some(path) => path.to_path_buf(),
            None if Path::new(Self::ADDON_OPTIONS_FILE).exists() => {
                PathBuf::from(Self::ADDON_OPTIONS_FILE)
            }
            None if Path::new(Self::DEFAULT_CONFIG_FILE).exists() => {
                PathBuf::from(Self::DEFAULT_CONFIG_FILE)
            }
            None => bail!(
                "No config file found, tried {} and {}",
                Self::ADDON_OPTIONS_FILE,
                Self::DEFAULT_CONFIG_FILE
            ),
        };
        let options = Self::from_file(&path)?;
        options
            .validate()
            .with_context(|| format!("Invalid configuration in {path:?}"))?;
        Ok(options)
    }

    /// JSON files hold the options directly. YAML files may nest them under `options:`.
    pub fn from_file(path: &Path) -> Result<Self> {
        log::debug!("Loading config file from {path:?}");
        let file = std::fs::File::open(path)
            .with_context(|| format!("Cannot open config file {path:?}"))?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_reader(file)
                .with_context(|| format!("Cannot read JSON config from file: {path:?}"))
        } else {
            let value: serde_yaml::Value = serde_yaml::from_reader(file)
                .with_context(|| format!("Cannot read YAML config from file: {path:?}"))?;
            let options = match value.get("options") {
                Some(options) => options.clone(),
                None => value,
            };
            serde_yaml::from_value(options)
                .with_context(|| format!("Cannot read options from file: {path:?}"))
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.scan_interval == 0 {
            bail!("scan_interval must be greater than zero");
        }
        if self.default_cells > MAX_COUNT || self.default_temps > MAX_COUNT {
            bail!("default_cells and default_temps must not exceed {MAX_COUNT}");
        }
        match self.connection_type {
            ConnectionType::Serial if self.bms_serial.is_empty() => {
                bail!("connection_type Serial requires bms_serial")
            }
            ConnectionType::Socket if self.bms_ip.is_empty() || self.bms_port == 0 => {
                bail!("connection_type Socket requires bms_ip and bms_port")
            }
            _ => Ok(()),
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval)
    }

    pub fn hints(&self) -> ParseHints {
        ParseHints {
            cells: self.default_cells,
            temps: self.default_temps,
        }
    }

    /// Username and password, ignoring empty values.
    pub fn mqtt_credentials(&self) -> Option<(&str, &str)> {
        let user = self.mqtt_user.as_deref().filter(|u| !u.is_empty())?;
        Some((user, self.mqtt_password.as_deref().unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn json_options() {
        let file = write_config(
            ".json",
            r#"{
                "scan_interval": 10,
                "connection_type": "Socket",
                "bms_ip": "10.0.0.5",
                "bms_port": 5000,
                "mqtt_host": "broker",
                "mqtt_user": "",
                "mqtt_password": "",
                "debug_output": true
            }"#,
        );
        let options = Options::load(Some(file.path())).unwrap();
        assert_eq!(options.connection_type, ConnectionType::Socket);
        assert_eq!(options.scan_interval(), Duration::from_secs(10));
        assert_eq!(options.mqtt_port, 1883);
        assert_eq!(options.mqtt_base_topic, "bmspace");
        assert!(options.mqtt_ha_discovery);
        assert!(options.debug_output);
        assert_eq!(options.mqtt_credentials(), None);
        assert_eq!(options.hints(), ParseHints::default());
    }

    #[test]
    fn yaml_addon_options() {
        let file = write_config(
            ".yaml",
            "name: bmspace
options:
  scan_interval: 3
  connection_type: Serial
  bms_serial: /dev/ttyUSB0
  mqtt_host: localhost
  mqtt_user: user
  mqtt_password: secret
  default_cells: 15
",
        );
        let options = Options::load(Some(file.path())).unwrap();
        assert_eq!(options.connection_type, ConnectionType::Serial);
        assert_eq!(options.bms_serial, "/dev/ttyUSB0");
        assert_eq!(options.mqtt_credentials(), Some(("user", "secret")));
        assert_eq!(options.hints().cells, 15);
        assert_eq!(options.hints().temps, DEFAULT_TEMPS);
    }

    #[test]
    fn plain_yaml() {
        let file = write_config(
            ".yml",
            "connection_type: Socket\nbms_ip: 10.0.0.5\nbms_port: 5000\nmqtt_host: broker\n",
        );
        let options = Options::load(Some(file.path())).unwrap();
        assert_eq!(options.scan_interval, 5);
    }

    #[test]
    fn invalid_options() {
        let file = write_config(
            ".yaml",
            "scan_interval: 0
connection_type: Socket
bms_ip: 10.0.0.5
bms_port: 5000
mqtt_host: broker
",
        );
        assert!(Options::load(Some(file.path())).is_err());

        let file = write_config(
            ".yaml",
            "connection_type: Socket
bms_ip: 10.0.0.5
bms_port: 5000
mqtt_host: broker
default_cells: 100000
",
        );
        assert!(Options::load(Some(file.path())).is_err());

        let file = write_config(".yaml", "connection_type: Serial\nmqtt_host: broker\n");
        assert!(Options::load(Some(file.path())).is_err());

        let file = write_config(".yaml", "connection_type: Modem\nmqtt_host: broker\n");
        assert!(Options::load(Some(file.path())).is_err());
    }

    #[test]
    fn missing_file() {
        assert!(Options::load(Some(Path::new("/nonexistent/pacebms.yaml"))).is_err());
    }
}
