use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;
use serde::Serialize;

use crate::{
    config::DisplayConfig,
    types::{Page, Reading},
};

pub const ROOM_COUNT: usize = 3;
pub const CO2_ALERT_PPM: i32 = 1000;

pub trait UiSink {
    fn update_weather(&self, location: &str, temperature_c: f32, description: Option<&str>);
    fn update_outdoor(&self, temperature_c: f32, humidity: i32, pressure_hpa: i32);
    fn update_room(&self, index: i32, co2_ppm: i32, temperature_c: f32);

    fn apply(&self, reading: &Reading) {
        match reading {
            Reading::Weather(weather) => self.update_weather(
                &weather.location,
                weather.temperature_c,
                weather.description.as_deref(),
            ),
            Reading::Outdoor(outdoor) => self.update_outdoor(
                outdoor.temperature_c,
                outdoor.humidity,
                outdoor.pressure_hpa,
            ),
            Reading::Room(room) => {
                self.update_room(room.index, room.co2_ppm, room.temperature_c)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomWidgets {
    pub name: String,
    pub co2: String,
    #[serde(rename = "co2Alert")]
    pub co2_alert: bool,
    pub temperature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Widgets {
    pub page: Page,
    pub revision: u64,
    #[serde(rename = "outdoorTemp")]
    pub outdoor_temp: String,
    #[serde(rename = "outdoorHumidity")]
    pub outdoor_humidity: String,
    #[serde(rename = "outdoorPressure")]
    pub outdoor_pressure: String,
    #[serde(rename = "apiCity")]
    pub api_city: String,
    #[serde(rename = "apiTemp")]
    pub api_temp: String,
    #[serde(rename = "apiDescription")]
    pub api_description: String,
    pub rooms: [RoomWidgets; ROOM_COUNT],
}

impl Widgets {
    pub fn new(display: &DisplayConfig, location: &str) -> Self {
        Self {
            page: Page::Outdoor,
            revision: 0,
            outdoor_temp: "--.- °C".to_string(),
            outdoor_humidity: "Hum: --%".to_string(),
            outdoor_pressure: "Press: ---- hPa".to_string(),
            api_city: location.to_string(),
            api_temp: "-- °C".to_string(),
            api_description: "Loading...".to_string(),
            rooms: display.room_names.clone().map(|name| RoomWidgets {
                name,
                co2: "CO2: --".to_string(),
                co2_alert: false,
                temperature: "--°".to_string(),
            }),
        }
    }

    fn set(label: &mut String, text: String, changed: &mut bool) {
        if *label != text {
            *label = text;
            *changed = true;
        }
    }

    fn bump(&mut self, changed: bool) {
        if changed {
            self.revision = self.revision.wrapping_add(1);
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderLock {
    widgets: Arc<Mutex<Widgets>>,
}

impl RenderLock {
    pub fn new(widgets: Widgets) -> Self {
        Self {
            widgets: Arc::new(Mutex::new(widgets)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Widgets> {
        self.widgets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> Widgets {
        self.lock().clone()
    }

    pub fn changed_since(&self, seen_revision: u64) -> Option<Widgets> {
        let widgets = self.lock();
        (widgets.revision != seen_revision).then(|| widgets.clone())
    }

    pub fn swipe_next(&self) -> Page {
        let mut widgets = self.lock();
        let next = widgets.page.next();
        let changed = next != widgets.page;
        widgets.page = next;
        widgets.bump(changed);
        next
    }

    pub fn swipe_prev(&self) -> Page {
        let mut widgets = self.lock();
        let prev = widgets.page.prev();
        let changed = prev != widgets.page;
        widgets.page = prev;
        widgets.bump(changed);
        prev
    }
}

impl UiSink for RenderLock {
    fn update_weather(&self, location: &str, temperature_c: f32, description: Option<&str>) {
        let mut widgets = self.lock();
        let mut changed = false;
        Widgets::set(&mut widgets.api_city, location.to_string(), &mut changed);
        Widgets::set(
            &mut widgets.api_temp,
            format!("{temperature_c:.1} °C"),
            &mut changed,
        );
        if let Some(description) = description {
            Widgets::set(
                &mut widgets.api_description,
                description.to_string(),
                &mut changed,
            );
        }
        widgets.bump(changed);
    }

    fn update_outdoor(&self, temperature_c: f32, humidity: i32, pressure_hpa: i32) {
        let mut widgets = self.lock();
        let mut changed = false;
        Widgets::set(
            &mut widgets.outdoor_temp,
            format!("{temperature_c:.1} °C"),
            &mut changed,
        );
        Widgets::set(
            &mut widgets.outdoor_humidity,
            format!("Hum: {humidity}%"),
            &mut changed,
        );
        Widgets::set(
            &mut widgets.outdoor_pressure,
            format!("Prs: {pressure_hpa} hPa"),
            &mut changed,
        );
        widgets.bump(changed);
    }

    fn update_room(&self, index: i32, co2_ppm: i32, temperature_c: f32) {
        let Some(slot) = usize::try_from(index).ok().filter(|slot| *slot < ROOM_COUNT) else {
            debug!("ignoring reading for room {index}");
            return;
        };

        let mut widgets = self.lock();
        let mut changed = false;
        let room = &mut widgets.rooms[slot];
        Widgets::set(&mut room.co2, format!("CO2: {co2_ppm}"), &mut changed);
        Widgets::set(
            &mut room.temperature,
            format!("{temperature_c:.1}°"),
            &mut changed,
        );
        let alert = co2_ppm > CO2_ALERT_PPM;
        if room.co2_alert != alert {
            room.co2_alert = alert;
            changed = true;
        }
        widgets.bump(changed);
    }
}
