use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One reading returned by the telemetry daemon.
///
/// Every field is optional on the wire. Readings from boards that lack a
/// sensor simply omit it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceReading {
    /// Active NV power model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nvpmodel: Option<PowerMode>,

    /// Time since boot as reported by the daemon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<Uptime>,

    /// Fan state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan: Option<FanReading>,

    /// Temperatures in Celsius keyed by sensor name (e.g. "GPU", "thermal").
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub temperature: BTreeMap<String, f64>,

    /// Power rail readings.
    #[serde(default)]
    pub power: PowerReadings,
}

/// NV power model descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerMode {
    /// Mode name (e.g. "MAXN", "15W").
    pub name: String,

    /// Numeric mode id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
}

/// Uptime split into whole days and seconds within the current day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Uptime {
    #[serde(default)]
    pub days: u64,

    #[serde(default)]
    pub seconds: u64,
}

impl Uptime {
    /// Whole hours within the current day.
    pub fn hours(&self) -> u64 {
        self.seconds / 3600
    }

    /// Minutes within the current hour.
    pub fn minutes(&self) -> u64 {
        (self.seconds / 60) % 60
    }
}

/// Fan reading. The speed is passed through unit-less, as reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FanReading {
    #[serde(default)]
    pub speed: f64,
}

/// Power readings: the board total plus the per-rail table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerReadings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<RailReading>,

    /// Per-rail readings keyed by rail name (e.g. "SOC", "CPU GPU CV").
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub rails: BTreeMap<String, RailReading>,
}

/// A single power rail sample in milliwatts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RailReading {
    /// Instantaneous value.
    #[serde(default)]
    pub cur: f64,

    /// Running average.
    #[serde(default)]
    pub avg: f64,
}

/// Usage of one filesystem, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DiskUsage {
    pub free: u64,
    pub total: u64,
    pub used: u64,
    /// Used share of the filesystem, 0-100, one decimal.
    pub percent: f64,
}

impl DiskUsage {
    /// Build usage figures from filesystem block counts.
    ///
    /// `free` counts only blocks available to unprivileged users, while
    /// `used` excludes root-reserved blocks. `percent` is therefore
    /// `used / (used + free)`, not `used / total`.
    pub fn from_blocks(
        fragment_size: u64,
        blocks: u64,
        blocks_free: u64,
        blocks_available: u64,
    ) -> Self {
        let total = blocks.saturating_mul(fragment_size);
        let used = blocks.saturating_sub(blocks_free).saturating_mul(fragment_size);
        let free = blocks_available.saturating_mul(fragment_size);

        let usable = used as f64 + free as f64;
        let percent = if usable > 0.0 {
            ((used as f64 / usable) * 1000.0).round() / 10.0
        } else {
            0.0
        };

        Self {
            free,
            total,
            used,
            percent,
        }
    }
}

/// Facts about the local host that do not come from the telemetry daemon.
#[derive(Debug, Clone, PartialEq)]
pub struct HostFacts {
    pub username: String,
    pub hostname: String,
    /// Boot time in Unix epoch seconds.
    pub boot_time: Option<u64>,
    /// Usage of the configured mount point, if it could be resolved.
    pub disk: Option<DiskUsage>,
}

/// An immutable view of the board assembled from exactly one daemon read.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub username: String,
    pub hostname: String,
    pub power_mode: Option<String>,
    pub uptime: Option<Uptime>,
    /// Informational; not exported.
    pub boot_time: Option<u64>,
    pub disk: Option<DiskUsage>,
    pub fan_speed: Option<f64>,
    pub temperatures: BTreeMap<String, f64>,
    pub power_rails: BTreeMap<String, RailReading>,
}

impl Snapshot {
    /// Combine one daemon reading with the local host facts.
    pub fn assemble(reading: SourceReading, host: HostFacts) -> Self {
        Self {
            username: host.username,
            hostname: host.hostname,
            power_mode: reading.nvpmodel.map(|mode| mode.name),
            uptime: reading.uptime,
            boot_time: host.boot_time,
            disk: host.disk,
            fan_speed: reading.fan.map(|fan| fan.speed),
            temperatures: reading.temperature,
            power_rails: reading.power.rails,
        }
    }

    /// Temperature of a sensor, if the board reported it.
    pub fn temperature(&self, sensor: &str) -> Option<f64> {
        self.temperatures.get(sensor).copied()
    }

    /// Instantaneous power of a rail, if the board reported it.
    pub fn rail_current(&self, rail: &str) -> Option<f64> {
        self.power_rails.get(rail).map(|r| r.cur)
    }
}

/// Get the current Unix timestamp in seconds.
pub fn current_timestamp_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
