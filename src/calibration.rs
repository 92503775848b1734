//! Bias calibration: for every frequency, find the bias voltage that
//! maximizes measured output power.
//!
//! At each frequency the candidates `initial + j * step` are applied in
//! ascending order. Each candidate is settled, the analyzer's running
//! average is cleared and allowed to refill, and the marker power is read.
//! The highest reading wins; on ties the first (lowest) voltage is kept.
//!
//! A candidate above the safety ceiling aborts the whole run before it is
//! applied. Completed entries are still persisted so the work done so far
//! is not lost.

use std::io::Write;
use std::path::Path;
use std::thread;

use log::{debug, info, warn};

use crate::bench::{Bench, require_source};
use crate::channel::InstrumentChannel;
use crate::config::{SweepConfig, VoltageSearch};
use crate::error::{Result, SweepError};
use crate::frequency::{FrequencyRange, Mixer, StepCursor};
use crate::record::ResultLog;
use crate::vmap::FrequencyVoltageMap;

/// One evaluated candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoltageSample {
    pub voltage: f64,
    /// dBm
    pub power: f64,
}

/// Highest-power sample; the earliest wins among equal maxima.
///
/// Samples with a non-finite power never win.
pub fn select_optimum(samples: &[VoltageSample]) -> Option<VoltageSample> {
    let mut best: Option<VoltageSample> = None;
    for sample in samples.iter().filter(|s| s.power.is_finite()) {
        match best {
            Some(b) if sample.power <= b.power => {}
            _ => best = Some(*sample),
        }
    }
    best
}

pub struct BiasCalibrator<'a, C: InstrumentChannel> {
    bench: &'a mut Bench<C>,
    range: FrequencyRange,
    mixer: Mixer,
    search: VoltageSearch,
}

impl<'a, C: InstrumentChannel> BiasCalibrator<'a, C> {
    pub fn new(bench: &'a mut Bench<C>, config: &SweepConfig) -> Self {
        Self {
            bench,
            range: config.range,
            mixer: config.mixer,
            search: config.search.clone(),
        }
    }

    /// Calibrate every frequency in the range and save the map to `map_path`.
    ///
    /// Every evaluated candidate is appended to `log`.
    pub fn calibrate<W: Write>(
        &mut self,
        log: &mut ResultLog<W>,
        map_path: &Path,
    ) -> Result<FrequencyVoltageMap> {
        if self.range.steps() == 0 {
            return Err(SweepError::Config(format!(
                "frequency range {}..{} step {} has no points",
                self.range.start, self.range.end, self.range.step
            )));
        }
        let mut map = FrequencyVoltageMap::new();
        match self.run(&mut map, log) {
            Ok(()) => {
                info!(
                    "Calibration complete: {} frequencies mapped to their maximum-power voltage",
                    map.len()
                );
                map.save(map_path)?;
                Ok(map)
            }
            Err(e) => {
                if let Some(source) = self.bench.source.as_mut() {
                    if let Err(zero_err) = source.zero() {
                        warn!("Could not zero the voltage source after abort: {zero_err}");
                    }
                }
                if !map.is_empty() {
                    match map.save(map_path) {
                        Ok(()) => warn!(
                            "Calibration aborted; {} completed entries kept in {}",
                            map.len(),
                            map_path.display()
                        ),
                        Err(save_err) => warn!("Could not save partial calibration: {save_err}"),
                    }
                }
                Err(e)
            }
        }
    }

    fn run<W: Write>(&mut self, map: &mut FrequencyVoltageMap, log: &mut ResultLog<W>) -> Result<()> {
        require_source(&mut self.bench.source)?;
        let mut cursor = StepCursor::new(self.range, self.mixer);
        info!(
            "Calibrating {} frequencies from {} to {} GHz, {} candidates each",
            self.range.steps(),
            self.range.start,
            self.range.end,
            self.search.count
        );

        let generator = &mut self.bench.generator;
        generator.set_fixed_frequency(cursor.sweep_frequency())?;
        generator.set_step(self.mixer.sweep_step(self.range.step))?;
        thread::sleep(self.search.advance());

        loop {
            let frequency = cursor.frequency();
            self.configure_analyzer()?;

            let samples = self.search_voltage(frequency, log)?;
            let best = select_optimum(&samples).ok_or_else(|| {
                SweepError::Config("voltage search evaluated no candidates".to_string())
            })?;
            info!(
                "Frequency {frequency} GHz (generator {:.9} GHz): best voltage {} V at {} dBm",
                cursor.sweep_frequency(),
                best.voltage,
                best.power
            );
            map.insert(frequency, best.voltage);

            require_source(&mut self.bench.source)?.zero()?;
            if !cursor.advance() {
                break;
            }
            self.bench.generator.step_up()?;
            thread::sleep(self.search.advance());
        }
        Ok(())
    }

    fn configure_analyzer(&mut self) -> Result<()> {
        let analyzer = &mut self.bench.analyzer;
        analyzer.set_center_frequency(self.mixer.analyzer_center)?;
        analyzer.center_marker()?;
        analyzer.averaging(true)?;
        analyzer.set_average_count(self.search.average_count)
    }

    fn search_voltage<W: Write>(
        &mut self,
        frequency: f64,
        log: &mut ResultLog<W>,
    ) -> Result<Vec<VoltageSample>> {
        let Bench {
            source, analyzer, ..
        } = &mut *self.bench;
        let source = require_source(source)?;

        let mut samples = Vec::with_capacity(self.search.count as usize);
        for j in 0..self.search.count {
            let voltage = self.search.candidate(j);
            if voltage > self.search.ceiling {
                return Err(SweepError::SafetyBoundExceeded {
                    voltage,
                    ceiling: self.search.ceiling,
                });
            }
            source.set_voltage(voltage)?;
            thread::sleep(self.search.settle());

            analyzer.clear_average()?;
            thread::sleep(self.search.average());
            analyzer.center_marker()?;
            let power = analyzer.marker_power()?;
            debug!("{frequency} GHz, {voltage} V: {power} dBm");

            log.append([
                frequency.to_string(),
                voltage.to_string(),
                power.to_string(),
            ])?;
            samples.push(VoltageSample { voltage, power });
        }
        Ok(samples)
    }
}
