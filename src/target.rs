//! Per-target collector translating gateway statistics into metric points.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, warn};

use crate::client::{ApiKeyAuthenticator, ClientError, ClientMetrics, TtnClient};
use crate::config;
use crate::metrics::{Collector, Desc, MetricPoint, MetricType};
use crate::stats::GatewayConnectionStats;

/// Builds a fully qualified gateway metric name.
fn metric_name(name: &str) -> String {
    format!("ttn_gateway_{name}")
}

/// The fixed descriptor set of one target.
///
/// Built once at construction and never reshaped; only data values and
/// repeated-group label sets (versions, IPs, antennas, sub-bands) vary
/// between collection cycles.
struct TargetDescs {
    last_scrape_result: Arc<Desc>,
    connected_at: Arc<Desc>,
    disconnected_at: Arc<Desc>,
    last_status_at: Arc<Desc>,
    last_uplink_at: Arc<Desc>,
    last_downlink_at: Arc<Desc>,
    downlink_count: Arc<Desc>,
    uplink_count: Arc<Desc>,
    rtt_min: Arc<Desc>,
    rtt_max: Arc<Desc>,
    rtt_median: Arc<Desc>,
    rtt_count: Arc<Desc>,
    time: Arc<Desc>,
    boot_time: Arc<Desc>,
    version: Arc<Desc>,
    ip: Arc<Desc>,
    protocol: Arc<Desc>,
    status_metrics: Arc<Desc>,
    antenna_location: Arc<Desc>,
    antenna_location_lat: Arc<Desc>,
    antenna_location_lon: Arc<Desc>,
    antenna_location_alt: Arc<Desc>,
    antenna_location_accuracy: Arc<Desc>,
    antenna_location_source: Arc<Desc>,
    subband_utilization_limit: Arc<Desc>,
    subband_utilization: Arc<Desc>,
}

impl TargetDescs {
    fn new(gateway_id: &str) -> Self {
        let desc = |name: &str, help: &str, metric_type: MetricType, labels: &[&str]| {
            Arc::new(Desc::new(
                metric_name(name),
                help,
                metric_type,
                labels,
                &[("gateway", gateway_id)],
            ))
        };

        Self {
            last_scrape_result: desc(
                "last_scrape_result",
                "1 if the scrape from the TTN API was successful",
                MetricType::Gauge,
                &[],
            ),
            connected_at: desc(
                "connected_at",
                "Time the Gateway connected",
                MetricType::Gauge,
                &[],
            ),
            disconnected_at: desc(
                "disconnected_at",
                "Time the Gateway disconnected",
                MetricType::Gauge,
                &[],
            ),
            last_status_at: desc(
                "last_status_at",
                "Time TTN last received a status from the Gateway",
                MetricType::Gauge,
                &[],
            ),
            last_uplink_at: desc(
                "last_uplink_at",
                "Time TTN last received an uplink from the Gateway",
                MetricType::Gauge,
                &[],
            ),
            last_downlink_at: desc(
                "last_downlink_at",
                "Time TTN last sent a downlink to the Gateway",
                MetricType::Gauge,
                &[],
            ),
            downlink_count: desc(
                "downlink_count",
                "Number of downlinks through this Gateway",
                MetricType::Counter,
                &[],
            ),
            uplink_count: desc(
                "uplink_count",
                "Number of uplinks through this Gateway",
                MetricType::Counter,
                &[],
            ),
            rtt_min: desc(
                "rtt_min",
                "Minimum round-trip-time in seconds",
                MetricType::Gauge,
                &[],
            ),
            rtt_max: desc(
                "rtt_max",
                "Maximum round-trip-time in seconds",
                MetricType::Gauge,
                &[],
            ),
            rtt_median: desc(
                "rtt_median",
                "Median round-trip-time in seconds",
                MetricType::Gauge,
                &[],
            ),
            rtt_count: desc(
                "rtt_count",
                "Number of round-trips",
                MetricType::Counter,
                &[],
            ),
            time: desc("time", "Gateway time", MetricType::Gauge, &[]),
            boot_time: desc("boot_time", "Gateway boot time", MetricType::Gauge, &[]),
            version: desc(
                "version",
                "Constantly 1. Exports the version of a subsystem as label.",
                MetricType::Gauge,
                &["subsystem", "version"],
            ),
            ip: desc(
                "ip",
                "Constantly 1. Exports the IP of the Gateway as label",
                MetricType::Gauge,
                &["num", "ip"],
            ),
            protocol: desc(
                "protocol",
                "Constantly 1. Exports the used protocol by the Gateway as label",
                MetricType::Gauge,
                &["protocol"],
            ),
            status_metrics: desc(
                "status_metrics",
                "Gateway status metrics",
                MetricType::Gauge,
                &["metric"],
            ),
            antenna_location: desc(
                "antenna_location",
                "Constantly 1. Antenna Location",
                MetricType::Gauge,
                &["antenna", "lat", "lon", "altitude", "accuracy", "source"],
            ),
            antenna_location_lat: desc(
                "antenna_location_lat",
                "Antenna Latitude",
                MetricType::Gauge,
                &["antenna"],
            ),
            antenna_location_lon: desc(
                "antenna_location_lon",
                "Antenna Longitude",
                MetricType::Gauge,
                &["antenna"],
            ),
            antenna_location_alt: desc(
                "antenna_location_alt",
                "Antenna Altitude",
                MetricType::Gauge,
                &["antenna"],
            ),
            antenna_location_accuracy: desc(
                "antenna_location_accuracy",
                "Antenna location accuracy",
                MetricType::Gauge,
                &["antenna"],
            ),
            antenna_location_source: desc(
                "antenna_location_source",
                "Constantly 1. Exports the antenna location source as label.",
                MetricType::Gauge,
                &["antenna", "source"],
            ),
            subband_utilization_limit: desc(
                "subband_utilization_limit",
                "Sub-band utilization limit",
                MetricType::Gauge,
                &["freqMin", "freqMax"],
            ),
            subband_utilization: desc(
                "subband_utilization",
                "Sub-band utilization",
                MetricType::Gauge,
                &["freqMin", "freqMax"],
            ),
        }
    }

    fn all(&self) -> Vec<Arc<Desc>> {
        vec![
            self.last_scrape_result.clone(),
            self.connected_at.clone(),
            self.disconnected_at.clone(),
            self.last_status_at.clone(),
            self.last_uplink_at.clone(),
            self.last_downlink_at.clone(),
            self.downlink_count.clone(),
            self.uplink_count.clone(),
            self.rtt_min.clone(),
            self.rtt_max.clone(),
            self.rtt_median.clone(),
            self.rtt_count.clone(),
            self.time.clone(),
            self.boot_time.clone(),
            self.version.clone(),
            self.ip.clone(),
            self.protocol.clone(),
            self.status_metrics.clone(),
            self.antenna_location.clone(),
            self.antenna_location_lat.clone(),
            self.antenna_location_lon.clone(),
            self.antenna_location_alt.clone(),
            self.antenna_location_accuracy.clone(),
            self.antenna_location_source.clone(),
            self.subband_utilization_limit.clone(),
            self.subband_utilization.clone(),
        ]
    }
}

/// Collector for one configured gateway.
pub struct TargetCollector {
    target: config::Target,
    client: TtnClient,
    descs: TargetDescs,
}

impl TargetCollector {
    /// Build a collector for one configured target.
    ///
    /// Fails if the target's base URL cannot be parsed.
    pub fn new(target: config::Target, metrics: Arc<ClientMetrics>) -> Result<Self, ClientError> {
        let authenticator = ApiKeyAuthenticator {
            api_key: target.api_key.clone(),
        };
        let client = TtnClient::new(target.base_url(), Box::new(authenticator), metrics)?;
        let descs = TargetDescs::new(&target.gateway_id);

        Ok(Self {
            target,
            client,
            descs,
        })
    }

    pub fn gateway_id(&self) -> &str {
        &self.target.gateway_id
    }

    /// Translate one statistics record into metric points.
    ///
    /// A field that cannot be translated is skipped with a warning; it never
    /// affects sibling fields.
    fn emit_stats(&self, stats: &GatewayConnectionStats, points: &mut Vec<MetricPoint>) {
        if let Some(value) = self.parse_count("downlink_count", &stats.downlink_count) {
            points.push(MetricPoint::new(&self.descs.downlink_count, vec![], value));
        }
        if let Some(value) = self.parse_count("uplink_count", &stats.uplink_count) {
            points.push(MetricPoint::new(&self.descs.uplink_count, vec![], value));
        }

        points.push(MetricPoint::new(
            &self.descs.connected_at,
            vec![],
            unix_time(stats.connected_at),
        ));
        points.push(MetricPoint::new(
            &self.descs.disconnected_at,
            vec![],
            unix_time(stats.disconnected_at),
        ));
        points.push(MetricPoint::new(
            &self.descs.last_status_at,
            vec![],
            unix_time(stats.last_status_received_at),
        ));
        points.push(MetricPoint::new(
            &self.descs.last_uplink_at,
            vec![],
            unix_time(stats.last_uplink_received_at),
        ));
        points.push(MetricPoint::new(
            &self.descs.last_downlink_at,
            vec![],
            unix_time(stats.last_downlink_received_at),
        ));

        points.push(MetricPoint::new(
            &self.descs.rtt_min,
            vec![],
            stats.round_trip_times.min,
        ));
        points.push(MetricPoint::new(
            &self.descs.rtt_max,
            vec![],
            stats.round_trip_times.max,
        ));
        points.push(MetricPoint::new(
            &self.descs.rtt_median,
            vec![],
            stats.round_trip_times.median,
        ));
        points.push(MetricPoint::new(
            &self.descs.rtt_count,
            vec![],
            f64::from(stats.round_trip_times.count),
        ));

        points.push(MetricPoint::new(
            &self.descs.time,
            vec![],
            unix_time(stats.last_status.time),
        ));
        points.push(MetricPoint::new(
            &self.descs.boot_time,
            vec![],
            unix_time(stats.last_status.boot_time),
        ));

        for (subsystem, version) in &stats.last_status.versions {
            points.push(MetricPoint::new(
                &self.descs.version,
                vec![subsystem.clone(), version.clone()],
                1.0,
            ));
        }
        for (i, ip) in stats.last_status.ip.iter().enumerate() {
            points.push(MetricPoint::new(
                &self.descs.ip,
                vec![i.to_string(), ip.clone()],
                1.0,
            ));
        }
        points.push(MetricPoint::new(
            &self.descs.protocol,
            vec![stats.protocol.clone()],
            1.0,
        ));
        for (name, value) in &stats.last_status.metrics {
            points.push(MetricPoint::new(
                &self.descs.status_metrics,
                vec![name.clone()],
                *value,
            ));
        }

        for (i, location) in stats.last_status.antenna_locations.iter().enumerate() {
            let antenna = i.to_string();
            points.push(MetricPoint::new(
                &self.descs.antenna_location_lat,
                vec![antenna.clone()],
                location.latitude,
            ));
            points.push(MetricPoint::new(
                &self.descs.antenna_location_lon,
                vec![antenna.clone()],
                location.longitude,
            ));
            points.push(MetricPoint::new(
                &self.descs.antenna_location_alt,
                vec![antenna.clone()],
                f64::from(location.altitude),
            ));
            points.push(MetricPoint::new(
                &self.descs.antenna_location_accuracy,
                vec![antenna.clone()],
                f64::from(location.accuracy),
            ));
            points.push(MetricPoint::new(
                &self.descs.antenna_location_source,
                vec![antenna.clone(), location.source.clone()],
                1.0,
            ));
            points.push(MetricPoint::new(
                &self.descs.antenna_location,
                vec![
                    antenna,
                    format!("{:.6}", location.latitude),
                    format!("{:.6}", location.longitude),
                    location.altitude.to_string(),
                    location.accuracy.to_string(),
                    location.source.clone(),
                ],
                1.0,
            ));
        }

        for band in &stats.sub_bands {
            points.push(MetricPoint::new(
                &self.descs.subband_utilization_limit,
                vec![band.min_frequency.clone(), band.max_frequency.clone()],
                band.downlink_utilization_limit,
            ));
            points.push(MetricPoint::new(
                &self.descs.subband_utilization,
                vec![band.min_frequency.clone(), band.max_frequency.clone()],
                band.downlink_utilization.unwrap_or(0.0),
            ));
        }
    }

    /// Parse an upstream numeric-string counter.
    ///
    /// An empty string means no data yet and counts as zero. A non-numeric
    /// value skips only this field.
    fn parse_count(&self, field: &'static str, raw: &str) -> Option<f64> {
        if raw.is_empty() {
            return Some(0.0);
        }
        match raw.parse::<i64>() {
            Ok(value) => Some(value as f64),
            Err(_) => {
                warn!(
                    gateway = %self.target.gateway_id,
                    source = field,
                    value = raw,
                    "numeric string to int conversion error"
                );
                None
            }
        }
    }
}

/// Unix seconds of an optional timestamp; unset reports as zero.
fn unix_time(timestamp: Option<DateTime<Utc>>) -> f64 {
    match timestamp {
        Some(t) => t.timestamp() as f64,
        None => 0.0,
    }
}

#[async_trait]
impl Collector for TargetCollector {
    fn describe(&self) -> Vec<Arc<Desc>> {
        self.descs.all()
    }

    async fn collect(&self) -> Vec<MetricPoint> {
        let mut points = Vec::new();

        match self.client.connection_stats(&self.target.gateway_id).await {
            Ok(stats) => {
                points.push(MetricPoint::new(&self.descs.last_scrape_result, vec![], 1.0));
                self.emit_stats(&stats, &mut points);
            }
            Err(err) => {
                error!(gateway = %self.target.gateway_id, error = %err, "scrape error");
                points.push(MetricPoint::new(&self.descs.last_scrape_result, vec![], 0.0));
            }
        }

        points
    }
}
