use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};

/// Serialization format for daemon frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// JSON format (human-readable, good for debugging).
    #[default]
    Json,

    /// CBOR format (compact binary).
    Cbor,
}

impl Format {
    /// Get the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Format::Json => "application/json",
            Format::Cbor => "application/cbor",
        }
    }
}

/// Encode a value to bytes using the specified format.
pub fn encode<T: Serialize>(value: &T, format: Format) -> Result<Vec<u8>> {
    match format {
        Format::Json => serde_json::to_vec(value).map_err(Error::from),
        Format::Cbor => {
            let mut buf = Vec::new();
            ciborium::into_writer(value, &mut buf)?;
            Ok(buf)
        }
    }
}

/// Decode bytes to a value using the specified format.
pub fn decode<T: DeserializeOwned>(data: &[u8], format: Format) -> Result<T> {
    match format {
        Format::Json => serde_json::from_slice(data).map_err(Error::from),
        Format::Cbor => ciborium::from_reader(data).map_err(|e| Error::Cbor(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{FanReading, SourceReading, Uptime};

    fn sample_reading() -> SourceReading {
        let mut reading = SourceReading {
            uptime: Some(Uptime {
                days: 2,
                seconds: 7380,
            }),
            fan: Some(FanReading { speed: 40.0 }),
            ..Default::default()
        };
        reading.temperature.insert("GPU".to_string(), 55.0);
        reading
    }

    #[test]
    fn test_cbor_is_smaller() {
        let reading = sample_reading();

        let json = encode(&reading, Format::Json).unwrap();
        let cbor = encode(&reading, Format::Cbor).unwrap();

        assert!(cbor.len() < json.len(), "CBOR should be smaller than JSON");
    }

    #[test]
    fn test_roundtrip_both_formats() {
        let reading = sample_reading();

        for format in [Format::Json, Format::Cbor] {
            let bytes = encode(&reading, format).unwrap();
            let decoded: SourceReading = decode(&bytes, format).unwrap();
            assert_eq!(decoded, reading);
        }
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result: Result<SourceReading> = decode(b"not json", Format::Json);
        assert!(matches!(result, Err(Error::Json(_))));

        let result: Result<SourceReading> = decode(b"\xff\xff", Format::Cbor);
        assert!(matches!(result, Err(Error::Cbor(_))));
    }

    #[test]
    fn test_mime_type() {
        assert_eq!(Format::Json.mime_type(), "application/json");
        assert_eq!(Format::Cbor.mime_type(), "application/cbor");
    }
}
