use serde_json::Value;

use crate::{
    error::DecodeError,
    types::{DecodedWeather, OutdoorReading, Reading, RequestKind, RoomReading},
};

/// Parses a completed body for `kind`.
///
/// `location` is the label configured for this deployment; the payload's own
/// location fields are ignored.
pub fn decode(body: &[u8], kind: RequestKind, location: &str) -> Result<Reading, DecodeError> {
    let document: Value = serde_json::from_slice(body).map_err(|err| DecodeError::Malformed {
        kind,
        reason: err.to_string(),
    })?;

    match kind {
        RequestKind::Weather => decode_weather(&document, location).map(Reading::Weather),
        RequestKind::Outdoor => decode_outdoor(&document).map(Reading::Outdoor),
        RequestKind::Indoor => decode_room(&document).map(Reading::Room),
    }
}

fn decode_weather(document: &Value, location: &str) -> Result<DecodedWeather, DecodeError> {
    let temperature = number_at(document, &["main", "temp"]).ok_or(DecodeError::MissingField {
        kind: RequestKind::Weather,
        field: "main.temp",
    })?;

    let description = document
        .get("weather")
        .and_then(|entries| entries.get(0))
        .and_then(|entry| entry.get("description"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(DecodedWeather {
        location: location.to_string(),
        temperature_c: temperature as f32,
        description,
    })
}

fn decode_outdoor(document: &Value) -> Result<OutdoorReading, DecodeError> {
    let field = |name: &'static str| {
        number_at(document, &[name]).ok_or(DecodeError::MissingField {
            kind: RequestKind::Outdoor,
            field: name,
        })
    };

    Ok(OutdoorReading {
        temperature_c: field("temp")? as f32,
        humidity: field("humidity")?.round() as i32,
        pressure_hpa: field("pressure")?.round() as i32,
    })
}

fn decode_room(document: &Value) -> Result<RoomReading, DecodeError> {
    let field = |name: &'static str| {
        number_at(document, &[name]).ok_or(DecodeError::MissingField {
            kind: RequestKind::Indoor,
            field: name,
        })
    };

    Ok(RoomReading {
        index: field("room")? as i32,
        co2_ppm: field("co2")?.round() as i32,
        temperature_c: field("temp")? as f32,
    })
}

fn number_at(document: &Value, path: &[&str]) -> Option<f64> {
    path.iter()
        .try_fold(document, |node, key| node.get(key))
        .and_then(Value::as_f64)
        .filter(|value| value.is_finite())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn extracts_nested_temperature() {
        let reading = decode(br#"{"main":{"temp":21.5}}"#, RequestKind::Weather, "Cherkassy").unwrap();

        assert_eq!(
            reading,
            Reading::Weather(DecodedWeather {
                location: "Cherkassy".to_string(),
                temperature_c: 21.5,
                description: None,
            })
        );
    }

    #[test]
    fn uses_configured_location_and_optional_description() {
        let body = br#"{
            "name": "Uman",
            "weather": [{"id": 804, "description": "overcast clouds"}],
            "main": {"temp": -3.25, "humidity": 80}
        }"#;

        let Reading::Weather(weather) = decode(body, RequestKind::Weather, "Home").unwrap() else {
            panic!("expected weather reading");
        };

        assert_eq!(weather.location, "Home");
        assert_eq!(weather.temperature_c, -3.25);
        assert_eq!(weather.description.as_deref(), Some("overcast clouds"));
    }

    #[test]
    fn missing_temperature_is_reported() {
        let err = decode(br#"{"main":{}}"#, RequestKind::Weather, "Home").unwrap_err();

        assert_eq!(
            err,
            DecodeError::MissingField {
                kind: RequestKind::Weather,
                field: "main.temp",
            }
        );
    }

    #[test]
    fn non_numeric_temperature_is_missing() {
        let err = decode(br#"{"main":{"temp":"warm"}}"#, RequestKind::Weather, "Home").unwrap_err();

        assert!(matches!(err, DecodeError::MissingField { .. }));
    }

    #[test]
    fn garbage_is_malformed() {
        let err = decode(b"not json", RequestKind::Weather, "Home").unwrap_err();

        assert!(matches!(
            err,
            DecodeError::Malformed {
                kind: RequestKind::Weather,
                ..
            }
        ));
    }

    #[test]
    fn truncated_document_is_malformed() {
        let err = decode(br#"{"main":{"temp":2"#, RequestKind::Weather, "Home").unwrap_err();

        assert!(matches!(err, DecodeError::Malformed { .. }));
    }

    #[test]
    fn decodes_outdoor_station_payload() {
        let reading = decode(
            br#"{"temp":14.2,"humidity":61.4,"pressure":1013}"#,
            RequestKind::Outdoor,
            "Home",
        )
        .unwrap();

        assert_eq!(
            reading,
            Reading::Outdoor(OutdoorReading {
                temperature_c: 14.2,
                humidity: 61,
                pressure_hpa: 1013,
            })
        );
    }

    #[test]
    fn decodes_room_payload() {
        let reading = decode(
            br#"{"room":2,"co2":1150,"temp":23.0}"#,
            RequestKind::Indoor,
            "Home",
        )
        .unwrap();

        assert_eq!(
            reading,
            Reading::Room(RoomReading {
                index: 2,
                co2_ppm: 1150,
                temperature_c: 23.0,
            })
        );
    }

    #[test]
    fn room_payload_without_co2_is_missing_field() {
        let err = decode(br#"{"room":0,"temp":20.0}"#, RequestKind::Indoor, "Home").unwrap_err();

        assert_eq!(
            err,
            DecodeError::MissingField {
                kind: RequestKind::Indoor,
                field: "co2",
            }
        );
    }
}
