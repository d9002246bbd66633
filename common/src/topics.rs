use crate::{error::DecodeError, types::RequestKind};

pub const TOPIC_SENSOR_OUTDOOR: &str = "weather-station/sensor/outdoor";
pub const TOPIC_SENSOR_INDOOR: &str = "weather-station/sensor/indoor";
pub const TOPIC_STATION_STATUS: &str = "weather-station/status";

pub const SENSOR_TOPICS: [&str; 2] = [TOPIC_SENSOR_OUTDOOR, TOPIC_SENSOR_INDOOR];

pub fn kind_for_topic(topic: &str) -> Result<RequestKind, DecodeError> {
    match topic {
        TOPIC_SENSOR_OUTDOOR => Ok(RequestKind::Outdoor),
        TOPIC_SENSOR_INDOOR => Ok(RequestKind::Indoor),
        other => Err(DecodeError::UnknownKind(other.to_string())),
    }
}
