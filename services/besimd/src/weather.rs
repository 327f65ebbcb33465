//! The local-simulator stand-in for the vendor weather feed.
//!
//! Grounded on `proxyMiddleware.py`'s locally-served
//! `getWebTemperature.php` branch: when the simulator is configured
//! with its own weather-station location, it answers that endpoint
//! itself rather than asking the real cloud. The cache here is fed by
//! whatever outside temperature the engine has most recently pushed to
//! a device (`besim_outside_temperature`), not a live third-party
//! fetch — see DESIGN.md.

use std::sync::Arc;

use besim_telemetry::Sidecar;

use crate::config::WeatherLocation;

pub struct WeatherState {
    pub location: Option<WeatherLocation>,
    telemetry: Arc<Sidecar>,
}

impl WeatherState {
    pub fn new(location: Option<WeatherLocation>, telemetry: Arc<Sidecar>) -> Self {
        WeatherState { location, telemetry }
    }

    pub fn current_celsius(&self) -> Option<f64> {
        self.telemetry.latest_outside_temperature()
    }

    /// Body text for `GET /WifiBoxInterface_vokera/getWebTemperature.php`:
    /// the integer-rounded current reading, or `"E_1"` if none is known
    /// yet, matching the original's failure sentinel.
    pub fn web_temperature_page(&self) -> String {
        match self.current_celsius() {
            Some(c) => format!("{}", c.round() as i64),
            None => "E_1".to_owned(),
        }
    }
}
