//! Run configuration.
//!
//! Loaded with figment from (lowest to highest precedence):
//! 1. built-in defaults ([`SweepConfig::default`])
//! 2. a TOML file
//! 3. environment variables prefixed with `FREQ_SWEEP_`, nested keys
//!    separated by `__` (e.g. `FREQ_SWEEP_SEARCH__CEILING=0.5`)
//!
//! # Example
//! ```toml
//! topology = "three-instrument"
//!
//! [range]
//! start = 220.0
//! end = 300.0
//! step = 5.0
//!
//! [mixer]
//! multiplier = 18.0
//! analyzer_center = 0.065
//!
//! [search]
//! initial = 0.1
//! step = 0.01
//! count = 41
//! ceiling = 0.65
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SweepError};
use crate::frequency::{FrequencyRange, Mixer};

/// Which instruments are on the bench.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topology {
    /// Signal generator and spectrum analyzer, no bias source.
    TwoInstrument,
    /// Voltage source, signal generator and spectrum analyzer.
    ThreeInstrument,
}

impl Topology {
    pub fn instrument_count(self) -> usize {
        match self {
            Topology::TwoInstrument => 2,
            Topology::ThreeInstrument => 3,
        }
    }

    pub fn has_voltage_source(self) -> bool {
        matches!(self, Topology::ThreeInstrument)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    pub topology: Topology,
    pub range: FrequencyRange,
    pub mixer: Mixer,
    pub analyzer: AnalyzerConfig,
    pub search: VoltageSearch,
    pub measurement: MeasurementConfig,
    pub fluctuation: FluctuationConfig,
    pub bench: BenchConfig,
    pub output: OutputConfig,
}

/// Timing shared by every analyzer read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Pause after marker commands and before reading the marker value.
    pub query_delay_ms: u64,
    /// Pause between a single-sweep trigger and the trace download.
    pub trace_delay_ms: u64,
}

/// Voltage search performed at every calibration frequency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoltageSearch {
    /// First candidate, volts.
    pub initial: f64,
    /// Increment between candidates, volts.
    pub step: f64,
    /// Number of candidates evaluated per frequency.
    pub count: u32,
    /// Hard limit; a candidate above it aborts the run.
    pub ceiling: f64,
    pub average_count: u32,
    /// Wait after applying a candidate voltage.
    pub settle_ms: u64,
    /// Wait after clearing the average, before reading power.
    pub average_ms: u64,
    /// Wait after stepping the generator to the next frequency.
    pub advance_ms: u64,
}

/// Per-point measurement of the sweep test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementConfig {
    /// Average on the analyzer; when off, every point is a single raw read.
    pub averaging: bool,
    pub average_count: u32,
    pub settle_ms: u64,
    pub average_ms: u64,
    pub advance_ms: u64,
    pub screenshot: bool,
    /// Folder on the analyzer's own drive; each run stores its screenshots
    /// in a timestamped subfolder.
    pub screenshot_dir: String,
    pub trace: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FluctuationConfig {
    pub samples: usize,
    /// Physical frequency in GHz; defaults to the range start.
    pub frequency: Option<f64>,
    /// Bias applied during sampling when a voltage source is present.
    pub voltage: Option<f64>,
    /// Wait after disabling averaging, before the first sample.
    pub warmup_ms: u64,
    /// Wait between consecutive samples.
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchConfig {
    /// VISA resource strings in role order (voltage source first when
    /// present, then generator, then analyzer). Empty means discover.
    pub resources: Vec<String>,
    /// Output port of the voltage source carrying the bias.
    pub bias_output: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub map_file: String,
    pub calibration_log: String,
    pub sweep_log: String,
    pub fluctuation_log: String,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            topology: Topology::ThreeInstrument,
            range: FrequencyRange::new(65.0, 160.0, 5.0),
            mixer: Mixer {
                multiplier: 1.0,
                analyzer_center: 0.047,
            },
            analyzer: AnalyzerConfig {
                query_delay_ms: 500,
                trace_delay_ms: 5_000,
            },
            search: VoltageSearch {
                initial: 0.1,
                step: 0.01,
                count: 41,
                ceiling: 0.65,
                average_count: 10,
                settle_ms: 500,
                average_ms: 25_000,
                advance_ms: 2_000,
            },
            measurement: MeasurementConfig {
                averaging: true,
                average_count: 50,
                settle_ms: 500,
                average_ms: 110_000,
                advance_ms: 3_000,
                screenshot: false,
                screenshot_dir: "D:\\Data".to_string(),
                trace: false,
            },
            fluctuation: FluctuationConfig {
                samples: 500,
                frequency: None,
                voltage: None,
                warmup_ms: 1_000,
                interval_ms: 1_500,
            },
            bench: BenchConfig {
                resources: Vec::new(),
                bias_output: "OUT2".to_string(),
                timeout_ms: 5_000,
            },
            output: OutputConfig {
                directory: PathBuf::from("."),
                map_file: "freq_volt_map.csv".to_string(),
                calibration_log: "calibration.csv".to_string(),
                sweep_log: "sweep.csv".to_string(),
                fluctuation_log: "fluctuation.csv".to_string(),
            },
        }
    }
}

impl SweepConfig {
    /// Load defaults, then `path` if it exists, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(SweepConfig::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(SweepError::Config(format!(
                    "config file {} not found",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }
        Self::from_figment(figment.merge(Env::prefixed("FREQ_SWEEP_").split("__")))
    }

    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(SweepConfig::default())).merge(Toml::string(toml)),
        )
    }

    fn from_figment(figment: Figment) -> Result<Self> {
        let config: SweepConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(SweepError::Config(msg));
        let range = &self.range;
        if !(range.step.is_finite() && range.step > 0.0) {
            return invalid(format!("range.step must be positive, got {}", range.step));
        }
        if !(range.start.is_finite() && range.end.is_finite()) || range.end < range.start {
            return invalid(format!(
                "range must satisfy start <= end, got {}..{}",
                range.start, range.end
            ));
        }
        if !(self.mixer.multiplier.is_finite() && self.mixer.multiplier > 0.0) {
            return invalid(format!(
                "mixer.multiplier must be positive, got {}",
                self.mixer.multiplier
            ));
        }
        if !self.mixer.analyzer_center.is_finite() {
            return invalid("mixer.analyzer_center must be finite".to_string());
        }

        let search = &self.search;
        if !(search.ceiling.is_finite() && search.ceiling > 0.0) {
            return invalid(format!(
                "search.ceiling must be positive, got {}",
                search.ceiling
            ));
        }
        if !(search.initial.is_finite() && search.step.is_finite() && search.step > 0.0) {
            return invalid("search.initial and search.step must be finite, step positive".into());
        }
        if search.count == 0 {
            return invalid("search.count must be at least 1".into());
        }
        if search.average_count == 0 || self.measurement.average_count == 0 {
            return invalid("average_count must be at least 1".into());
        }
        if self.fluctuation.samples == 0 {
            return invalid("fluctuation.samples must be at least 1".into());
        }
        if !self.bench.resources.is_empty()
            && self.bench.resources.len() != self.topology.instrument_count()
        {
            return invalid(format!(
                "bench.resources lists {} instruments but topology needs {}",
                self.bench.resources.len(),
                self.topology.instrument_count()
            ));
        }
        Ok(())
    }

    pub fn map_path(&self) -> PathBuf {
        self.output.directory.join(&self.output.map_file)
    }

    pub fn calibration_log_path(&self) -> PathBuf {
        self.output.directory.join(&self.output.calibration_log)
    }

    pub fn sweep_log_path(&self) -> PathBuf {
        self.output.directory.join(&self.output.sweep_log)
    }

    pub fn fluctuation_log_path(&self) -> PathBuf {
        self.output.directory.join(&self.output.fluctuation_log)
    }
}

impl AnalyzerConfig {
    pub fn query_delay(&self) -> Duration {
        Duration::from_millis(self.query_delay_ms)
    }

    pub fn trace_delay(&self) -> Duration {
        Duration::from_millis(self.trace_delay_ms)
    }
}

impl VoltageSearch {
    /// The `index`-th candidate, rounded to the microvolt.
    pub fn candidate(&self, index: u32) -> f64 {
        let volts = self.initial + f64::from(index) * self.step;
        (volts * 1e6).round() / 1e6
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn average(&self) -> Duration {
        Duration::from_millis(self.average_ms)
    }

    pub fn advance(&self) -> Duration {
        Duration::from_millis(self.advance_ms)
    }
}

impl MeasurementConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn average(&self) -> Duration {
        Duration::from_millis(self.average_ms)
    }

    pub fn advance(&self) -> Duration {
        Duration::from_millis(self.advance_ms)
    }
}

impl FluctuationConfig {
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}
