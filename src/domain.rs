use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// the fixed set of telemetry sources the dashboard knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Temperature,
    Humidity,
    CpuTemperature,
    DiskUsage,
}

impl SensorKind {
    pub const ALL: [SensorKind; 4] = [
        SensorKind::Temperature,
        SensorKind::Humidity,
        SensorKind::CpuTemperature,
        SensorKind::DiskUsage,
    ];

    /// Sensors whose backend keeps a historical series.
    pub const LOGGABLE: [SensorKind; 2] = [SensorKind::Temperature, SensorKind::Humidity];

    /// endpoint prefix relative to the transport base url
    pub fn endpoint(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "sensors/tempsensor",
            SensorKind::Humidity => "sensors/humiditysensor",
            SensorKind::CpuTemperature => "system/cputemperature",
            SensorKind::DiskUsage => "system/fileusage",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
            SensorKind::CpuTemperature => "cpu_temperature",
            SensorKind::DiskUsage => "disk_usage",
        }
    }

    pub fn parse(s: &str) -> Option<SensorKind> {
        SensorKind::ALL.into_iter().find(|k| k.as_str() == s)
    }

    pub fn is_loggable(&self) -> bool {
        SensorKind::LOGGABLE.contains(self)
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Icon catalog the display layer draws from.
///
/// Lookup is case-insensitive and never fails: anything outside the
/// catalog resolves to [`Icon::Default`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Icon {
    TempSensor,
    HumiditySensor,
    CpuTemperature,
    FileUsage,
    Default,
}

impl Icon {
    pub fn lookup(classification: &str) -> Icon {
        match classification.trim().to_ascii_uppercase().as_str() {
            "TEMPSENSOR" => Icon::TempSensor,
            "HUMIDITYSENSOR" => Icon::HumiditySensor,
            "CPUTEMPERATURE" => Icon::CpuTemperature,
            "FILEUSAGE" => Icon::FileUsage,
            _ => Icon::Default,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Icon::TempSensor => "TEMPSENSOR",
            Icon::HumiditySensor => "HUMIDITYSENSOR",
            Icon::CpuTemperature => "CPUTEMPERATURE",
            Icon::FileUsage => "FILEUSAGE",
            Icon::Default => "DEFAULT",
        }
    }
}

/// a single current-value measurement, ready for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub id: String,
    pub name: String,
    /// always a fixed two-decimal number, e.g. "21.70"
    pub value: String,
    /// classification string; resolve through [`SensorReading::icon_kind`]
    pub icon: String,
    pub timestamp: DateTime<Utc>,
}

impl SensorReading {
    pub fn icon_kind(&self) -> Icon {
        Icon::lookup(&self.icon)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub value: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// historical measurements for one sensor, oldest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSeries {
    pub id: String,
    pub name: String,
    pub points: Vec<SeriesPoint>,
}

/// Series from independent log fetches, keyed by series name.
///
/// Merging replaces one key and leaves the others alone, so merges from
/// different series commute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesAggregate {
    series: BTreeMap<String, SensorSeries>,
}

impl SeriesAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// insert `series` under its name, returning whatever it replaced
    pub fn merge(&mut self, series: SensorSeries) -> Option<SensorSeries> {
        self.series.insert(series.name.clone(), series)
    }

    pub fn get(&self, name: &str) -> Option<&SensorSeries> {
        self.series.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SensorSeries> {
        self.series.values()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}
