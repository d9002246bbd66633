use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const OPENWEATHER_BASE_URL: &str = "https://api.openweathermap.org/data/2.5/weather";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    pub api_key: String,
    pub latitude: f64,
    pub longitude: f64,
    pub location_label: String,
    pub refresh_interval_ms: u64,
    pub request_timeout_ms: u64,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_base_url() -> String {
    OPENWEATHER_BASE_URL.to_string()
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            latitude: 48.45,
            longitude: 30.13,
            location_label: "Cherkassy".to_string(),
            refresh_interval_ms: 3_600_000,
            request_timeout_ms: 10_000,
            base_url: default_base_url(),
        }
    }
}

impl WeatherConfig {
    pub fn request_url(&self) -> String {
        format!(
            "{}?lat={:.2}&lon={:.2}&appid={}&units=metric",
            self.base_url, self.latitude, self.longitude, self.api_key
        )
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn sanitize(&mut self) {
        self.latitude = self.latitude.clamp(-90.0, 90.0);
        self.longitude = self.longitude.clamp(-180.0, 180.0);
        self.refresh_interval_ms = self.refresh_interval_ms.clamp(60_000, 86_400_000);
        self.request_timeout_ms = self.request_timeout_ms.clamp(1_000, 60_000);
        if self.base_url.trim().is_empty() {
            self.base_url = default_base_url();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DisplayConfig {
    pub room_names: [String; 3],
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            room_names: [
                "Living".to_string(),
                "Bedroom".to_string(),
                "Kids".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub weather: WeatherConfig,
    pub network: NetworkConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.weather.sanitize();
        if self.network.mqtt_port == 0 {
            self.network.mqtt_port = 1883;
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn request_url_carries_location_key_and_metric_units() {
        let config = WeatherConfig {
            api_key: "secret".to_string(),
            ..WeatherConfig::default()
        };

        assert_eq!(
            config.request_url(),
            "https://api.openweathermap.org/data/2.5/weather?lat=48.45&lon=30.13&appid=secret&units=metric"
        );
    }

    #[test]
    fn sanitize_clamps_intervals_and_coordinates() {
        let mut config = WeatherConfig {
            latitude: 120.0,
            longitude: -200.0,
            refresh_interval_ms: 5,
            request_timeout_ms: 0,
            base_url: "  ".to_string(),
            ..WeatherConfig::default()
        };
        config.sanitize();

        assert_eq!(config.latitude, 90.0);
        assert_eq!(config.longitude, -180.0);
        assert_eq!(config.refresh_interval_ms, 60_000);
        assert_eq!(config.request_timeout_ms, 1_000);
        assert_eq!(config.base_url, OPENWEATHER_BASE_URL);
    }

    #[test]
    fn missing_display_section_falls_back_to_defaults() {
        let raw = r#"{
            "weather": {
                "api_key": "k",
                "latitude": 50.0,
                "longitude": 30.0,
                "location_label": "Kyiv",
                "refresh_interval_ms": 900000,
                "request_timeout_ms": 10000
            },
            "network": {
                "wifi_ssid": "home",
                "wifi_pass": "pw",
                "mqtt_host": "10.0.0.2",
                "mqtt_port": 1883,
                "mqtt_user": "",
                "mqtt_pass": ""
            }
        }"#;

        let runtime: RuntimeConfig = serde_json::from_str(raw).unwrap();

        assert_eq!(runtime.display, DisplayConfig::default());
        assert_eq!(runtime.weather.base_url, OPENWEATHER_BASE_URL);
        assert_eq!(runtime.weather.location_label, "Kyiv");
    }
}
