//! Typed SCPI drivers for the three bench instruments.
//!
//! Each driver owns one [`InstrumentChannel`] and exposes exactly the
//! commands the controller needs. Values are validated before anything is
//! written to the bus.

use std::thread;
use std::time::Duration;

use log::debug;

use crate::channel::{InstrumentChannel, parse_f64, parse_f64_list};
use crate::error::{Result, SweepError};

fn finite(channel: &str, what: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(SweepError::Instrument(format!(
            "{channel}: {what} must be finite, got {value}"
        )))
    }
}

/// DC source driving the device-under-test bias (gate) voltage.
pub struct VoltageSource<C> {
    channel: C,
}

impl<C: InstrumentChannel> VoltageSource<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    /// Select the output port that carries the bias, e.g. `OUT2`.
    pub fn select_output(&mut self, port: &str) -> Result<()> {
        self.channel.write(&format!("INST:SEL {port}"))
    }

    pub fn set_voltage(&mut self, volts: f64) -> Result<()> {
        let volts = finite(self.channel.name(), "voltage", volts)?;
        debug!("{}: VOLT {volts}", self.channel.name());
        self.channel.write(&format!("VOLT {volts}"))
    }

    pub fn zero(&mut self) -> Result<()> {
        self.channel.write("VOLT 0")
    }

    pub fn output(&mut self, on: bool) -> Result<()> {
        self.channel
            .write(if on { "OUTP ON" } else { "OUTP OFF" })
    }
}

/// Swept signal generator feeding the frequency multiplier.
pub struct SignalGenerator<C> {
    channel: C,
}

impl<C: InstrumentChannel> SignalGenerator<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    pub fn set_fixed_frequency(&mut self, ghz: f64) -> Result<()> {
        let ghz = finite(self.channel.name(), "frequency", ghz)?;
        self.channel.write(&format!(":FREQ:FIX {ghz} GHz"))
    }

    /// Step used by [`SignalGenerator::step_up`].
    pub fn set_step(&mut self, ghz: f64) -> Result<()> {
        let ghz = finite(self.channel.name(), "frequency step", ghz)?;
        if ghz <= 0.0 {
            return Err(SweepError::Instrument(format!(
                "{}: frequency step must be positive, got {ghz}",
                self.channel.name()
            )));
        }
        self.channel.write(&format!(":FREQ:STEP {ghz} GHz"))
    }

    pub fn step_up(&mut self) -> Result<()> {
        self.channel.write(":FREQ UP")
    }
}

/// Spectrum analyzer reading output power at its marker.
pub struct SpectrumAnalyzer<C> {
    channel: C,
    query_delay: Duration,
    trace_delay: Duration,
}

impl<C: InstrumentChannel> SpectrumAnalyzer<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            query_delay: Duration::ZERO,
            trace_delay: Duration::ZERO,
        }
    }

    /// Pause after marker commands and before reading a marker value.
    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = delay;
        self
    }

    /// Pause between triggering a single sweep and downloading its trace.
    pub fn with_trace_delay(mut self, delay: Duration) -> Self {
        self.trace_delay = delay;
        self
    }

    pub fn set_center_frequency(&mut self, ghz: f64) -> Result<()> {
        let ghz = finite(self.channel.name(), "center frequency", ghz)?;
        self.channel.write(&format!(":FREQ:CENT {ghz} GHz"))
    }

    pub fn center_marker(&mut self) -> Result<()> {
        self.channel.write("CALC:MARK:CENT")?;
        thread::sleep(self.query_delay);
        Ok(())
    }

    /// Marker amplitude in dBm.
    pub fn marker_power(&mut self) -> Result<f64> {
        self.channel.write("CALC:MARK:Y?")?;
        thread::sleep(self.query_delay);
        let reply = self.channel.read()?;
        parse_f64(self.channel.name(), &reply)
    }

    pub fn averaging(&mut self, on: bool) -> Result<()> {
        self.channel
            .write(if on { "AVER ON" } else { "AVER OFF" })
    }

    pub fn set_average_count(&mut self, count: u32) -> Result<()> {
        if count == 0 {
            return Err(SweepError::Instrument(format!(
                "{}: averaging count must be at least 1",
                self.channel.name()
            )));
        }
        self.channel.write(&format!("AVER:COUN {count}"))
    }

    /// Restart the running average so the next window holds fresh samples only.
    pub fn clear_average(&mut self) -> Result<()> {
        self.channel.write("AVER:CLE")
    }

    /// Create a folder on the analyzer's own drive.
    pub fn make_directory(&mut self, path: &str) -> Result<()> {
        self.channel
            .write(&format!(":MMEM:MDIR '{path}'"))
            .map_err(|e| SweepError::Capture(format!("folder '{path}': {e}")))
    }

    /// Store a screenshot on the analyzer's own drive.
    pub fn store_screenshot(&mut self, path: &str) -> Result<()> {
        let capture = |e: SweepError| SweepError::Capture(format!("screenshot '{path}': {e}"));
        self.channel.write("*CLS").map_err(capture)?;
        self.channel
            .write(&format!(":MMEM:STOR:SCR '{path}';*WAI"))
            .map_err(capture)
    }

    /// Take a single sweep and download trace 1 as amplitudes.
    pub fn trace_data(&mut self) -> Result<Vec<f64>> {
        let name = self.channel.name().to_string();
        let capture = |e: SweepError| SweepError::Capture(format!("trace data: {e}"));
        self.channel.write("*CLS").map_err(capture)?;
        self.channel.write(":INIT:CONT OFF").map_err(capture)?;
        self.channel.write("INIT:IMM;*WAI").map_err(capture)?;
        thread::sleep(self.trace_delay);
        let reply = self.channel.query(":TRAC:DATA? TRACE1").map_err(capture)?;
        parse_f64_list(&name, &reply).map_err(capture)
    }
}
