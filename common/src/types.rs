use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestKind {
    Weather,
    Indoor,
    Outdoor,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Weather => "WEATHER",
            Self::Indoor => "INDOOR",
            Self::Outdoor => "OUTDOOR",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedWeather {
    pub location: String,
    pub temperature_c: f32,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutdoorReading {
    pub temperature_c: f32,
    pub humidity: i32,
    pub pressure_hpa: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoomReading {
    pub index: i32,
    pub co2_ppm: i32,
    pub temperature_c: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Weather(DecodedWeather),
    Outdoor(OutdoorReading),
    Room(RoomReading),
}

impl Reading {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Weather(_) => RequestKind::Weather,
            Self::Outdoor(_) => RequestKind::Outdoor,
            Self::Room(_) => RequestKind::Indoor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Page {
    Outdoor,
    Weather,
    Indoor,
}

impl Page {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Outdoor => "OUTDOOR",
            Self::Weather => "WEATHER",
            Self::Indoor => "INDOOR",
        }
    }

    pub fn next(self) -> Self {
        match self {
            Self::Outdoor => Self::Weather,
            Self::Weather | Self::Indoor => Self::Indoor,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            Self::Indoor => Self::Weather,
            Self::Weather | Self::Outdoor => Self::Outdoor,
        }
    }
}
