//! Data schema of the TTN gateway connection statistics resource.
//!
//! Mirrors the Gateway Server API response. Every field may be absent from
//! the document; absence decodes into the default value and is never an
//! error.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

/// Connection statistics for one gateway.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConnectionStats {
    pub connected_at: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub protocol: String,
    pub last_status_received_at: Option<DateTime<Utc>>,
    pub last_status: GatewayStatus,
    pub last_uplink_received_at: Option<DateTime<Utc>>,
    /// Number of uplinks, transmitted as a numeric string. Empty means no
    /// data yet.
    pub uplink_count: String,
    pub last_downlink_received_at: Option<DateTime<Utc>>,
    /// Number of downlinks, transmitted as a numeric string.
    pub downlink_count: String,
    pub round_trip_times: RoundTripTimes,
    pub sub_bands: Vec<SubBand>,
}

/// Round-trip time summary between the Gateway Server and the gateway.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct RoundTripTimes {
    /// Minimum round-trip time in seconds.
    #[serde(with = "pb_duration")]
    pub min: f64,
    /// Maximum round-trip time in seconds.
    #[serde(with = "pb_duration")]
    pub max: f64,
    /// Median round-trip time in seconds.
    #[serde(with = "pb_duration")]
    pub median: f64,
    /// Number of round-trip samples.
    pub count: u32,
}

/// The last status message received from the gateway.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayStatus {
    pub time: Option<DateTime<Utc>>,
    pub boot_time: Option<DateTime<Utc>>,
    /// Subsystem name to version string.
    pub versions: HashMap<String, String>,
    pub antenna_locations: Vec<Location>,
    /// IP addresses of the gateway; list order is significant.
    pub ip: Vec<String>,
    /// Metric name to numeric value.
    pub metrics: HashMap<String, f64>,
    pub advanced: Option<serde_json::Value>,
}

/// An antenna location report.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: i32,
    pub accuracy: i32,
    pub source: String,
}

/// Downlink utilization figures for one frequency sub-band.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SubBand {
    /// Lower bound of the sub-band, used verbatim as a label value.
    pub min_frequency: String,
    /// Upper bound of the sub-band, used verbatim as a label value.
    pub max_frequency: String,
    pub downlink_utilization_limit: f64,
    pub downlink_utilization: Option<f64>,
}

/// Protobuf JSON encodes durations as decimal seconds with an `s` suffix
/// ("0.25s"). A bare number is accepted as seconds.
mod pb_duration {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Number(seconds) => Ok(seconds),
            Raw::Text(text) => text
                .trim_end_matches('s')
                .parse::<f64>()
                .map_err(|_| serde::de::Error::custom(format!("invalid duration {text:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_empty_document() {
        let stats: GatewayConnectionStats = serde_json::from_str("{}").unwrap();

        assert!(stats.connected_at.is_none());
        assert!(stats.disconnected_at.is_none());
        assert_eq!(stats.uplink_count, "");
        assert_eq!(stats.round_trip_times.count, 0);
        assert!(stats.sub_bands.is_empty());
        assert!(stats.last_status.versions.is_empty());
    }

    #[test]
    fn test_decode_full_document() {
        let json = r#"{
            "connected_at": "2021-01-01T00:00:00Z",
            "protocol": "grpc",
            "last_status_received_at": "2021-01-01T12:00:00Z",
            "last_status": {
                "time": "2021-01-01T12:00:00Z",
                "boot_time": "2020-12-31T23:00:00Z",
                "versions": {"ttn-lw-gateway-server": "3.11.0"},
                "antenna_locations": [
                    {"latitude": 49.144, "longitude": 9.218, "altitude": 180, "accuracy": 5, "source": "SOURCE_REGISTRY"}
                ],
                "ip": ["203.0.113.10"],
                "metrics": {"rxok": 1400.0}
            },
            "last_uplink_received_at": "2021-01-01T12:34:56Z",
            "uplink_count": "1400",
            "downlink_count": "118",
            "round_trip_times": {"min": "0.05s", "max": "0.25s", "median": "0.1s", "count": 20},
            "sub_bands": [
                {"min_frequency": "863000000", "max_frequency": "865000000", "downlink_utilization_limit": 0.001, "downlink_utilization": 0.00035}
            ]
        }"#;

        let stats: GatewayConnectionStats = serde_json::from_str(json).unwrap();

        assert_eq!(
            stats.connected_at.unwrap().timestamp(),
            1_609_459_200
        );
        assert!(stats.disconnected_at.is_none());
        assert_eq!(stats.protocol, "grpc");
        assert_eq!(stats.uplink_count, "1400");
        assert_eq!(stats.round_trip_times.min, 0.05);
        assert_eq!(stats.round_trip_times.median, 0.1);
        assert_eq!(stats.round_trip_times.count, 20);
        assert_eq!(stats.last_status.antenna_locations[0].altitude, 180);
        assert_eq!(
            stats.last_status.versions.get("ttn-lw-gateway-server"),
            Some(&"3.11.0".to_string())
        );
        assert_eq!(stats.sub_bands[0].downlink_utilization, Some(0.00035));
    }

    #[test]
    fn test_decode_subband_without_utilization() {
        let json = r#"{"min_frequency": "865000000", "max_frequency": "868000000", "downlink_utilization_limit": 0.01}"#;
        let band: SubBand = serde_json::from_str(json).unwrap();

        assert_eq!(band.downlink_utilization, None);
        assert_eq!(band.downlink_utilization_limit, 0.01);
    }

    #[test]
    fn test_duration_accepts_bare_number() {
        let rtt: RoundTripTimes = serde_json::from_str(r#"{"min": 0.5, "count": 1}"#).unwrap();
        assert_eq!(rtt.min, 0.5);
    }

    #[test]
    fn test_duration_rejects_junk() {
        let result: Result<RoundTripTimes, _> = serde_json::from_str(r#"{"min": "fast"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        // A numeric uplink_count is a type mismatch; the upstream API always
        // sends numeric strings.
        let result: Result<GatewayConnectionStats, _> =
            serde_json::from_str(r#"{"uplink_count": 7}"#);
        assert!(result.is_err());
    }
}
