//! Process configuration.
//!
//! TOML is the sole config source. Default path `/etc/besimd/besimd.toml`,
//! overridable by `$BESIM_CONFIG` or the `--config` CLI flag.
//!
//! Grounded on `services/forwarder/src/config.rs`'s `RawConfig` →
//! validated-config idiom.

use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct BesimConfig {
    pub udp_bind: String,
    pub cloud_relay: Option<CloudRelayConfig>,
    pub http: HttpConfig,
    pub weather: Option<WeatherLocation>,
    pub telemetry_sqlite_path: String,
    pub capture_path: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CloudRelayConfig {
    /// Resolved `host:port` of the real vendor cloud's UDP listener.
    pub cloud_addr: String,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub bind: String,
    /// Base URL of the real vendor cloud's HTTP surface, e.g.
    /// `https://api.besmart-home.com`.
    pub upstream_base: String,
}

#[derive(Debug, Clone, Copy)]
pub struct WeatherLocation {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    udp: Option<RawUdpConfig>,
    cloud_relay: Option<RawCloudRelayConfig>,
    http: Option<RawHttpConfig>,
    weather: Option<RawWeatherConfig>,
    telemetry: Option<RawTelemetryConfig>,
    capture: Option<RawCaptureConfig>,
    log_level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawUdpConfig {
    bind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCloudRelayConfig {
    enabled: Option<bool>,
    cloud_addr: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawHttpConfig {
    bind: Option<String>,
    upstream_base: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawWeatherConfig {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawTelemetryConfig {
    sqlite_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCaptureConfig {
    path: Option<String>,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {s}"),
            ConfigError::Parse(s) => write!(f, "parse error: {s}"),
            ConfigError::MissingField(s) => write!(f, "missing required field: {s}"),
            ConfigError::InvalidValue(s) => write!(f, "invalid config value: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}

pub fn default_config_path() -> String {
    std::env::var("BESIM_CONFIG").unwrap_or_else(|_| "/etc/besimd/besimd.toml".to_owned())
}

pub fn load_config_from_path(path: &Path) -> Result<BesimConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {e}", path.display())))?;
    load_config_from_str(&toml_str)
}

pub fn load_config_from_str(toml_str: &str) -> Result<BesimConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let udp_bind = raw.udp.and_then(|u| u.bind).unwrap_or_else(|| "0.0.0.0:6199".to_owned());

    let cloud_relay = match raw.cloud_relay {
        Some(c) if c.enabled.unwrap_or(false) => {
            let cloud_addr = c
                .cloud_addr
                .ok_or_else(|| ConfigError::MissingField("cloud_relay.cloud_addr".to_owned()))?;
            Some(CloudRelayConfig { cloud_addr })
        }
        _ => None,
    };

    let raw_http = raw.http.unwrap_or(RawHttpConfig { bind: None, upstream_base: None });
    let http = HttpConfig {
        bind: raw_http.bind.unwrap_or_else(|| "0.0.0.0:8099".to_owned()),
        upstream_base: raw_http.upstream_base.unwrap_or_else(|| "https://api.besmart-home.com".to_owned()),
    };

    let weather = match raw.weather {
        Some(w) => match (w.latitude, w.longitude) {
            (Some(latitude), Some(longitude)) => Some(WeatherLocation { latitude, longitude }),
            (None, None) => None,
            _ => return Err(ConfigError::InvalidValue("weather requires both latitude and longitude".to_owned())),
        },
        None => None,
    };

    let telemetry_sqlite_path = raw
        .telemetry
        .and_then(|t| t.sqlite_path)
        .unwrap_or_else(|| "/var/lib/besimd/besimd.sqlite".to_owned());

    let capture_path = raw.capture.and_then(|c| c.path);

    Ok(BesimConfig {
        udp_bind,
        cloud_relay,
        http,
        weather,
        telemetry_sqlite_path,
        capture_path,
        log_level: raw.log_level,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_in_every_default() {
        let cfg = load_config_from_str("").unwrap();
        assert_eq!(cfg.udp_bind, "0.0.0.0:6199");
        assert_eq!(cfg.http.bind, "0.0.0.0:8099");
        assert!(cfg.cloud_relay.is_none());
        assert!(cfg.weather.is_none());
    }

    #[test]
    fn cloud_relay_requires_an_address_once_enabled() {
        let toml = "[cloud_relay]\nenabled = true\n";
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn weather_location_requires_both_coordinates() {
        let toml = "[weather]\nlatitude = 45.0\n";
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn full_config_parses_every_section() {
        let toml = r#"
            log_level = "debug"
            [udp]
            bind = "0.0.0.0:7000"
            [cloud_relay]
            enabled = true
            cloud_addr = "203.0.113.5:6199"
            [http]
            bind = "0.0.0.0:9000"
            upstream_base = "https://api.besmart-home.com"
            [weather]
            latitude = 45.46
            longitude = 9.19
            [telemetry]
            sqlite_path = "/tmp/besimd.sqlite"
            [capture]
            path = "/tmp/besimd.capture.log"
        "#;
        let cfg = load_config_from_str(toml).unwrap();
        assert_eq!(cfg.udp_bind, "0.0.0.0:7000");
        assert_eq!(cfg.cloud_relay.unwrap().cloud_addr, "203.0.113.5:6199");
        assert_eq!(cfg.http.bind, "0.0.0.0:9000");
        assert_eq!(cfg.weather.unwrap().latitude, 45.46);
        assert_eq!(cfg.telemetry_sqlite_path, "/tmp/besimd.sqlite");
        assert_eq!(cfg.capture_path.as_deref(), Some("/tmp/besimd.capture.log"));
        assert_eq!(cfg.log_level.as_deref(), Some("debug"));
    }
}
