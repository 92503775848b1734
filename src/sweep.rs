//! Sweep test: replay the calibrated bias while stepping the generator and
//! record the measured power at every frequency.
//!
//! [`SweepRunner::sweep`] validates the voltage plan and configures the
//! instruments; the returned [`Sweep`] then measures one frequency per call
//! to `next`. It stops after the configured end frequency without stepping
//! the generator past it, and yields nothing further after an error.

use std::io::Write;
use std::thread;

use chrono::Local;
use log::{info, warn};

use crate::bench::{Bench, require_source};
use crate::channel::InstrumentChannel;
use crate::config::{MeasurementConfig, SweepConfig};
use crate::error::{Result, SweepError};
use crate::frequency::{FrequencyRange, Mixer, StepCursor};
use crate::record::ResultLog;
use crate::vmap::FrequencyVoltageMap;

/// Bias applied at each sweep point.
#[derive(Debug, Clone, PartialEq)]
pub enum VoltagePlan {
    /// Per-frequency voltage from a calibration.
    Calibrated(FrequencyVoltageMap),
    /// Same voltage everywhere.
    Fixed(f64),
    /// No bias source on the bench.
    Unbiased,
}

impl VoltagePlan {
    fn voltage_for(&self, frequency: f64) -> Result<Option<f64>> {
        match self {
            VoltagePlan::Calibrated(map) => map.get(frequency).map(Some).ok_or_else(|| {
                SweepError::CalibrationMapUnavailable(format!(
                    "no calibrated voltage for {frequency} GHz"
                ))
            }),
            VoltagePlan::Fixed(volts) => Ok(Some(*volts)),
            VoltagePlan::Unbiased => Ok(None),
        }
    }

    /// Check every point up front so a bad plan fails before any instrument I/O.
    fn validate(&self, range: &FrequencyRange, ceiling: f64) -> Result<()> {
        if let VoltagePlan::Calibrated(map) = self {
            if map.is_empty() {
                return Err(SweepError::CalibrationMapUnavailable(
                    "calibration map is empty".to_string(),
                ));
            }
        }
        for frequency in range.points() {
            if let Some(voltage) = self.voltage_for(frequency)? {
                if !voltage.is_finite() || voltage > ceiling {
                    return Err(SweepError::SafetyBoundExceeded { voltage, ceiling });
                }
            }
        }
        Ok(())
    }
}

/// One measured sweep point.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepRecord {
    pub index: usize,
    /// Physical frequency, GHz.
    pub frequency: f64,
    /// Frequency sent to the generator, GHz.
    pub sweep_frequency: f64,
    pub voltage: Option<f64>,
    /// dBm
    pub power: f64,
    pub trace: Option<Vec<f64>>,
}

impl SweepRecord {
    fn fields(&self) -> Vec<String> {
        let mut fields = vec![
            self.frequency.to_string(),
            self.sweep_frequency.to_string(),
            self.voltage.map(|v| v.to_string()).unwrap_or_default(),
            self.power.to_string(),
        ];
        if let Some(trace) = &self.trace {
            fields.extend(trace.iter().map(f64::to_string));
        }
        fields
    }
}

pub struct SweepRunner<'a, C: InstrumentChannel> {
    bench: &'a mut Bench<C>,
    range: FrequencyRange,
    mixer: Mixer,
    measurement: MeasurementConfig,
    ceiling: f64,
    run_label: String,
}

impl<'a, C: InstrumentChannel> SweepRunner<'a, C> {
    pub fn new(bench: &'a mut Bench<C>, config: &SweepConfig) -> Self {
        Self {
            bench,
            range: config.range,
            mixer: config.mixer,
            measurement: config.measurement.clone(),
            ceiling: config.search.ceiling,
            run_label: Local::now().format("%Y%m%d_%H%M%S").to_string(),
        }
    }

    /// Name of this run's screenshot subfolder. Defaults to the start time.
    pub fn with_run_label(mut self, label: impl Into<String>) -> Self {
        self.run_label = label.into();
        self
    }

    pub fn sweep<W: Write>(
        mut self,
        plan: VoltagePlan,
        log: &'a mut ResultLog<W>,
    ) -> Result<Sweep<'a, C, W>> {
        plan.validate(&self.range, self.ceiling)?;
        if !matches!(plan, VoltagePlan::Unbiased) {
            require_source(&mut self.bench.source)?;
        }

        let cursor = StepCursor::new(self.range, self.mixer);
        let analyzer = &mut self.bench.analyzer;
        analyzer.set_center_frequency(self.mixer.analyzer_center)?;
        analyzer.center_marker()?;
        analyzer.averaging(self.measurement.averaging)?;
        if self.measurement.averaging {
            analyzer.set_average_count(self.measurement.average_count)?;
        }

        let screenshot_folder = if self.measurement.screenshot {
            let folder = format!(
                "{}\\{}",
                self.measurement.screenshot_dir.trim_end_matches('\\'),
                self.run_label
            );
            if let Err(e) = analyzer.make_directory(&folder) {
                skip_capture(e)?;
            }
            info!("Screenshots go to {folder} on the analyzer");
            Some(folder)
        } else {
            None
        };

        let generator = &mut self.bench.generator;
        generator.set_fixed_frequency(cursor.sweep_frequency())?;
        generator.set_step(self.mixer.sweep_step(self.range.step))?;
        thread::sleep(self.measurement.advance());

        info!(
            "Sweeping {} frequencies from {} to {} GHz",
            self.range.steps(),
            self.range.start,
            self.range.end
        );
        Ok(Sweep {
            bench: self.bench,
            log,
            plan,
            cursor,
            measurement: self.measurement,
            screenshot_folder,
            done: self.range.steps() == 0,
        })
    }
}

pub struct Sweep<'a, C: InstrumentChannel, W: Write> {
    bench: &'a mut Bench<C>,
    log: &'a mut ResultLog<W>,
    plan: VoltagePlan,
    cursor: StepCursor,
    measurement: MeasurementConfig,
    screenshot_folder: Option<String>,
    done: bool,
}

impl<C: InstrumentChannel, W: Write> Sweep<'_, C, W> {
    fn step(&mut self) -> Result<SweepRecord> {
        let index = self.cursor.index();
        let frequency = self.cursor.frequency();
        let sweep_frequency = self.cursor.sweep_frequency();
        let voltage = self.plan.voltage_for(frequency)?;

        let Bench {
            source,
            generator,
            analyzer,
        } = &mut *self.bench;

        if let Some(volts) = voltage {
            require_source(source)?.set_voltage(volts)?;
            thread::sleep(self.measurement.settle());
        }

        if self.measurement.averaging {
            analyzer.clear_average()?;
            thread::sleep(self.measurement.average());
        }
        analyzer.center_marker()?;
        let power = analyzer.marker_power()?;
        info!("Step {index}: {frequency} GHz, measured {power} dBm");

        if let Some(folder) = &self.screenshot_folder {
            let path = format!("{folder}\\{frequency}.png");
            if let Err(e) = analyzer.store_screenshot(&path) {
                skip_capture(e)?;
            }
        }

        let trace = if self.measurement.trace {
            match analyzer.trace_data() {
                Ok(trace) => Some(trace),
                Err(e) => {
                    skip_capture(e)?;
                    None
                }
            }
        } else {
            None
        };

        let record = SweepRecord {
            index,
            frequency,
            sweep_frequency,
            voltage,
            power,
            trace,
        };
        self.log.append(record.fields())?;

        if voltage.is_some() {
            require_source(source)?.zero()?;
        }
        if self.cursor.advance() {
            generator.step_up()?;
            thread::sleep(self.measurement.advance());
        } else {
            self.done = true;
        }
        Ok(record)
    }
}

fn skip_capture(e: SweepError) -> Result<()> {
    if e.is_recoverable() {
        warn!("{e}; continuing sweep");
        Ok(())
    } else {
        Err(e)
    }
}

impl<C: InstrumentChannel, W: Write> Iterator for Sweep<'_, C, W> {
    type Item = Result<SweepRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let result = self.step();
        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibrated_plan_needs_every_point() {
        let range = FrequencyRange::new(65.0, 75.0, 5.0);
        let partial: FrequencyVoltageMap = [(65.0, 0.3), (70.0, 0.3)].into_iter().collect();
        let err = VoltagePlan::Calibrated(partial).validate(&range, 0.65).unwrap_err();
        assert!(matches!(err, SweepError::CalibrationMapUnavailable(_)));
        assert!(err.to_string().contains("75"));
    }

    #[test]
    fn empty_map_is_unavailable() {
        let range = FrequencyRange::new(65.0, 75.0, 5.0);
        let err = VoltagePlan::Calibrated(FrequencyVoltageMap::new())
            .validate(&range, 0.65)
            .unwrap_err();
        assert!(matches!(err, SweepError::CalibrationMapUnavailable(_)));
    }

    #[test]
    fn plans_respect_the_ceiling() {
        let range = FrequencyRange::new(65.0, 70.0, 5.0);
        let err = VoltagePlan::Fixed(0.7).validate(&range, 0.65).unwrap_err();
        assert!(matches!(err, SweepError::SafetyBoundExceeded { .. }));

        let edited: FrequencyVoltageMap = [(65.0, 0.3), (70.0, 0.9)].into_iter().collect();
        assert!(VoltagePlan::Calibrated(edited).validate(&range, 0.65).is_err());
        assert!(VoltagePlan::Unbiased.validate(&range, 0.65).is_ok());
    }

    #[test]
    fn record_fields_append_trace() {
        let record = SweepRecord {
            index: 0,
            frequency: 65.0,
            sweep_frequency: 65.047,
            voltage: None,
            power: -40.5,
            trace: Some(vec![-90.0, -91.5]),
        };
        assert_eq!(
            record.fields(),
            vec!["65", "65.047", "", "-40.5", "-90", "-91.5"]
        );
    }
}
