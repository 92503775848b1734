//! Fluctuation test: repeated raw power readings at one frequency and bias,
//! used to characterize the analyzer's own noise.
//!
//! Averaging is switched off so every reading is an independent
//! instantaneous sample.

use std::io::Write;
use std::thread;

use log::{debug, info, warn};

use crate::bench::{Bench, require_source};
use crate::channel::InstrumentChannel;
use crate::config::{FluctuationConfig, SweepConfig};
use crate::error::{Result, SweepError};
use crate::frequency::Mixer;
use crate::instruments::{SignalGenerator, SpectrumAnalyzer, VoltageSource};
use crate::record::ResultLog;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FluctuationSample {
    /// 1-based sample number.
    pub index: usize,
    /// dBm
    pub power: f64,
}

pub struct FluctuationSampler<'a, C: InstrumentChannel> {
    bench: &'a mut Bench<C>,
    mixer: Mixer,
    timing: FluctuationConfig,
    ceiling: f64,
}

impl<'a, C: InstrumentChannel> FluctuationSampler<'a, C> {
    pub fn new(bench: &'a mut Bench<C>, config: &SweepConfig) -> Self {
        Self {
            bench,
            mixer: config.mixer,
            timing: config.fluctuation.clone(),
            ceiling: config.search.ceiling,
        }
    }

    /// Hold `frequency` (GHz) and `voltage`, then read `count` raw samples.
    pub fn sample<W: Write>(
        mut self,
        frequency: f64,
        voltage: Option<f64>,
        count: usize,
        log: &'a mut ResultLog<W>,
    ) -> Result<Samples<'a, C, W>> {
        if let Some(volts) = voltage {
            if !volts.is_finite() || volts > self.ceiling {
                return Err(SweepError::SafetyBoundExceeded {
                    voltage: volts,
                    ceiling: self.ceiling,
                });
            }
        }

        let Bench {
            source,
            generator,
            analyzer,
        } = &mut *self.bench;
        if let Some(volts) = voltage {
            require_source(source)?.set_voltage(volts)?;
        }
        let biased = voltage.is_some();

        if let Err(e) = hold_point(analyzer, generator, self.mixer, frequency) {
            if biased {
                release_bias(source);
            }
            return Err(e);
        }
        thread::sleep(self.timing.warmup());

        info!("Sampling power {count} times at {frequency} GHz");
        let mut samples = Samples {
            bench: self.bench,
            log,
            timing: self.timing,
            next: 1,
            count,
            failed: false,
            biased,
        };
        if count == 0 {
            samples.finish()?;
        }
        Ok(samples)
    }
}

/// Fix the generator at `frequency` and set the analyzer up for raw reads.
fn hold_point<C: InstrumentChannel>(
    analyzer: &mut SpectrumAnalyzer<C>,
    generator: &mut SignalGenerator<C>,
    mixer: Mixer,
    frequency: f64,
) -> Result<()> {
    analyzer.set_center_frequency(mixer.analyzer_center)?;
    analyzer.center_marker()?;
    generator.set_fixed_frequency(mixer.sweep_frequency(frequency))?;
    analyzer.averaging(false)
}

/// Best-effort zero after a failure.
fn release_bias<C: InstrumentChannel>(source: &mut Option<VoltageSource<C>>) {
    if let Some(source) = source.as_mut() {
        if let Err(e) = source.zero() {
            warn!("Could not zero the voltage source: {e}");
        }
    }
}

pub struct Samples<'a, C: InstrumentChannel, W: Write> {
    bench: &'a mut Bench<C>,
    log: &'a mut ResultLog<W>,
    timing: FluctuationConfig,
    next: usize,
    count: usize,
    failed: bool,
    /// A bias is applied and still has to be zeroed.
    biased: bool,
}

impl<C: InstrumentChannel, W: Write> Samples<'_, C, W> {
    fn read(&mut self) -> Result<FluctuationSample> {
        let index = self.next;
        let analyzer = &mut self.bench.analyzer;
        analyzer.center_marker()?;
        let power = analyzer.marker_power()?;
        debug!("Sample {index}: {power} dBm");
        self.log.append([index.to_string(), power.to_string()])?;

        self.next += 1;
        if index < self.count {
            thread::sleep(self.timing.interval());
        } else {
            self.finish()?;
        }
        Ok(FluctuationSample { index, power })
    }

    /// Return the source to 0 V once sampling is over.
    fn finish(&mut self) -> Result<()> {
        if self.biased {
            self.biased = false;
            require_source(&mut self.bench.source)?.zero()?;
        }
        Ok(())
    }
}

impl<C: InstrumentChannel, W: Write> Iterator for Samples<'_, C, W> {
    type Item = Result<FluctuationSample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next > self.count {
            return None;
        }
        let result = self.read();
        if result.is_err() {
            self.failed = true;
            if self.biased {
                self.biased = false;
                release_bias(&mut self.bench.source);
            }
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.failed {
            0
        } else {
            (self.count + 1).saturating_sub(self.next)
        };
        (0, Some(remaining))
    }
}
