#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and basal-schedule parsing for the pod manager.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - The basal-schedule CSV loader enforces headers and ordering before the
//!   engine applies its own device-level validation.
use serde::Deserialize;
use serde::de::Deserializer;

/// Basal schedule CSV schema.
///
/// Expected headers:
/// start_minutes,units_per_hour
///
/// Example:
/// start_minutes,units_per_hour
/// 0,0.85
/// 360,1.2
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct BasalRow {
    pub start_minutes: u32,
    pub units_per_hour: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PodCfg {
    /// Bolus delivery speed in units per second.
    pub bolus_delivery_rate_u_per_s: f64,
    /// Largest single bolus the pod accepts.
    pub max_bolus_u: f64,
    /// Largest basal or temp basal rate the pod accepts.
    pub max_basal_rate_u_per_hr: f64,
    /// Longest temp basal, in hours.
    pub max_temp_basal_hours: u32,
    pub reservoir_capacity_u: f64,
    /// Nominal pod lifetime after activation.
    pub lifetime_hours: u32,
}

impl Default for PodCfg {
    fn default() -> Self {
        Self {
            bolus_delivery_rate_u_per_s: 0.025,
            max_bolus_u: 30.0,
            max_basal_rate_u_per_hr: 30.0,
            max_temp_basal_hours: 12,
            reservoir_capacity_u: 200.0,
            lifetime_hours: 72,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FreshnessCfg {
    /// Status older than this is refreshed before the loop is told it may proceed.
    pub status_age_tolerance_s: u64,
}

impl Default for FreshnessCfg {
    fn default() -> Self {
        Self {
            status_age_tolerance_s: 6 * 60,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BasalCfg {
    /// Pod time zone as minutes east of UTC.
    pub utc_offset_min: i32,
    /// Daily schedule. Accepts either:
    /// - array of tables: [{ start_minutes = 0, units_per_hour = 1.0 }, ...]
    /// - array of tuples: [[0, 1.0], [360, 1.2], ...]
    #[serde(default, deserialize_with = "de_schedule")]
    pub schedule: Vec<BasalRow>,
    /// Optional CSV file overriding `schedule`.
    pub schedule_csv: Option<String>,
}

impl Default for BasalCfg {
    fn default() -> Self {
        Self {
            utc_offset_min: 0,
            schedule: vec![BasalRow {
                start_minutes: 0,
                units_per_hour: 1.0,
            }],
            schedule_csv: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimCfg {
    /// Simulated radio round-trip per exchange.
    pub latency_ms: u64,
    /// Reservoir fill of a freshly simulated pod.
    pub reservoir_u: f64,
    /// How long the CLI waits for an exchange to resolve.
    pub response_timeout_ms: u64,
}

impl Default for SimCfg {
    fn default() -> Self {
        Self {
            latency_ms: 20,
            reservoir_u: 150.0,
            response_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageCfg {
    /// Raw engine state (JSON), rewritten atomically on every change.
    pub state_file: String,
    /// Dose ledger (JSON), keyed by dose sync identifier.
    pub ledger_file: String,
}

impl Default for StorageCfg {
    fn default() -> Self {
        Self {
            state_file: "pump_state.json".to_string(),
            ledger_file: "dose_ledger.json".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub pod: PodCfg,
    #[serde(default)]
    pub freshness: FreshnessCfg,
    #[serde(default)]
    pub basal: BasalCfg,
    #[serde(default)]
    pub sim: SimCfg,
    #[serde(default)]
    pub storage: StorageCfg,
    #[serde(default)]
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RowToml {
    Tuple((u32, f64)),
    Table { start_minutes: u32, units_per_hour: f64 },
}

fn de_schedule<'de, D>(deserializer: D) -> Result<Vec<BasalRow>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<Vec<RowToml>> = Option::deserialize(deserializer)?;
    let mut out = Vec::new();
    if let Some(items) = opt {
        for r in items {
            match r {
                RowToml::Tuple((start_minutes, units_per_hour)) => out.push(BasalRow {
                    start_minutes,
                    units_per_hour,
                }),
                RowToml::Table {
                    start_minutes,
                    units_per_hour,
                } => out.push(BasalRow {
                    start_minutes,
                    units_per_hour,
                }),
            }
        }
    }
    Ok(out)
}

/// Check ordering and ranges of schedule rows. Device increments are checked by the engine.
pub fn validate_schedule(rows: &[BasalRow]) -> eyre::Result<()> {
    let Some(first) = rows.first() else {
        eyre::bail!("basal schedule must have at least one entry");
    };
    if first.start_minutes != 0 {
        eyre::bail!("basal schedule must start at minute 0, got {}", first.start_minutes);
    }
    for (i, pair) in rows.windows(2).enumerate() {
        if pair[1].start_minutes <= pair[0].start_minutes {
            eyre::bail!(
                "basal schedule start times must be strictly increasing (rows {} and {})",
                i,
                i + 1
            );
        }
    }
    for (i, row) in rows.iter().enumerate() {
        if row.start_minutes >= 24 * 60 {
            eyre::bail!("basal schedule row {i} starts after end of day");
        }
        if !row.units_per_hour.is_finite() || row.units_per_hour < 0.0 {
            eyre::bail!("basal schedule row {i} has an invalid rate");
        }
    }
    Ok(())
}

pub fn load_basal_schedule_csv(path: &std::path::Path) -> eyre::Result<Vec<BasalRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open basal schedule CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["start_minutes", "units_per_hour"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "basal schedule CSV must have headers 'start_minutes,units_per_hour', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<BasalRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }

    validate_schedule(&rows)?;
    Ok(rows)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Pod
        if !(self.pod.bolus_delivery_rate_u_per_s > 0.0
            && self.pod.bolus_delivery_rate_u_per_s.is_finite())
        {
            eyre::bail!("pod.bolus_delivery_rate_u_per_s must be > 0");
        }
        if !(self.pod.max_bolus_u >= 0.05 && self.pod.max_bolus_u <= 30.0) {
            eyre::bail!("pod.max_bolus_u must be in [0.05, 30.0]");
        }
        if !(self.pod.max_basal_rate_u_per_hr >= 0.05 && self.pod.max_basal_rate_u_per_hr <= 30.0)
        {
            eyre::bail!("pod.max_basal_rate_u_per_hr must be in [0.05, 30.0]");
        }
        if self.pod.max_temp_basal_hours == 0 || self.pod.max_temp_basal_hours > 12 {
            eyre::bail!("pod.max_temp_basal_hours must be in [1, 12]");
        }
        if !(self.pod.reservoir_capacity_u > 0.0) {
            eyre::bail!("pod.reservoir_capacity_u must be > 0");
        }
        if self.pod.lifetime_hours == 0 {
            eyre::bail!("pod.lifetime_hours must be >= 1");
        }

        // Freshness
        if self.freshness.status_age_tolerance_s == 0 {
            eyre::bail!("freshness.status_age_tolerance_s must be >= 1");
        }
        if self.freshness.status_age_tolerance_s > 24 * 60 * 60 {
            eyre::bail!("freshness.status_age_tolerance_s is unreasonably large (>24h)");
        }

        // Basal
        if self.basal.utc_offset_min.abs() >= 24 * 60 {
            eyre::bail!("basal.utc_offset_min must be within one day of UTC");
        }
        if self.basal.schedule_csv.is_none() {
            validate_schedule(&self.basal.schedule)?;
        }

        // Sim
        if self.sim.response_timeout_ms == 0 {
            eyre::bail!("sim.response_timeout_ms must be >= 1");
        }
        if self.sim.latency_ms >= self.sim.response_timeout_ms {
            eyre::bail!("sim.latency_ms must be below sim.response_timeout_ms");
        }
        if !(self.sim.reservoir_u >= 0.0 && self.sim.reservoir_u <= self.pod.reservoir_capacity_u)
        {
            eyre::bail!("sim.reservoir_u must be in [0, pod.reservoir_capacity_u]");
        }

        // Storage
        if self.storage.state_file.trim().is_empty() {
            eyre::bail!("storage.state_file must not be empty");
        }
        if self.storage.ledger_file.trim().is_empty() {
            eyre::bail!("storage.ledger_file must not be empty");
        }

        Ok(())
    }

    /// Schedule rows from the CSV override when configured, else from `[basal]`.
    pub fn basal_rows(&self) -> eyre::Result<Vec<BasalRow>> {
        match &self.basal.schedule_csv {
            Some(p) => load_basal_schedule_csv(std::path::Path::new(p)),
            None => Ok(self.basal.schedule.clone()),
        }
    }
}
