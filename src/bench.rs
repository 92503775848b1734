//! The set of instruments one run talks to, with their roles assigned.

use log::{info, warn};

use crate::channel::InstrumentChannel;
use crate::config::{SweepConfig, Topology};
use crate::error::{Result, SweepError};
use crate::instruments::{SignalGenerator, SpectrumAnalyzer, VoltageSource};

pub struct Bench<C: InstrumentChannel> {
    pub source: Option<VoltageSource<C>>,
    pub generator: SignalGenerator<C>,
    pub analyzer: SpectrumAnalyzer<C>,
}

impl<C: InstrumentChannel> Bench<C> {
    /// Assign roles by position: `[source, generator, analyzer]` for three
    /// instruments, `[generator, analyzer]` for two.
    pub fn from_channels(channels: Vec<C>, config: &SweepConfig) -> Result<Self> {
        let expected = config.topology.instrument_count();
        if channels.len() != expected {
            return Err(SweepError::EndpointDiscovery {
                expected,
                found: channels.len(),
            });
        }

        let mut channels = channels.into_iter();
        let mut next = || {
            channels
                .next()
                .ok_or(SweepError::EndpointDiscovery { expected, found: 0 })
        };
        let source = match config.topology {
            Topology::ThreeInstrument => Some(VoltageSource::new(next()?)),
            Topology::TwoInstrument => None,
        };
        let generator = SignalGenerator::new(next()?);
        let analyzer = SpectrumAnalyzer::new(next()?)
            .with_query_delay(config.analyzer.query_delay())
            .with_trace_delay(config.analyzer.trace_delay());

        Ok(Self {
            source,
            generator,
            analyzer,
        })
    }

    pub fn topology(&self) -> Topology {
        if self.source.is_some() {
            Topology::ThreeInstrument
        } else {
            Topology::TwoInstrument
        }
    }

    /// Route the bias to `bias_output`, start at 0 V and enable the output.
    pub fn prepare(&mut self, bias_output: &str) -> Result<()> {
        if let Some(source) = self.source.as_mut() {
            source.select_output(bias_output)?;
            source.zero()?;
            source.output(true)?;
            info!("Voltage source ready on {bias_output} at 0 V");
        }
        Ok(())
    }

    /// Leave the bench unbiased. Every step is attempted even if one fails.
    pub fn close(&mut self) -> Result<()> {
        if let Some(source) = self.source.as_mut() {
            let zeroed = source.zero();
            let disabled = source.output(false);
            if let Err(e) = &zeroed {
                warn!("Could not zero the voltage source: {e}");
            }
            zeroed?;
            disabled?;
        }
        Ok(())
    }
}

/// Role of each positional endpoint for `topology`.
pub fn role_names(topology: Topology) -> &'static [&'static str] {
    match topology {
        Topology::ThreeInstrument => &["voltage source", "signal generator", "spectrum analyzer"],
        Topology::TwoInstrument => &["signal generator", "spectrum analyzer"],
    }
}

pub(crate) fn require_source<C: InstrumentChannel>(
    source: &mut Option<VoltageSource<C>>,
) -> Result<&mut VoltageSource<C>> {
    source.as_mut().ok_or_else(|| {
        SweepError::Config("this operation needs the three-instrument topology".to_string())
    })
}
