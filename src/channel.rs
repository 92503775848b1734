use crate::error::{Result, SweepError};

/// A blocking text command channel to one instrument.
///
/// Exactly one command is outstanding at a time: a query is a `write`
/// followed by a `read` on the same channel, with nothing interleaved.
pub trait InstrumentChannel {
    /// Short human-readable name used in logs and error messages.
    fn name(&self) -> &str;

    /// Send one SCPI command (without terminator).
    fn write(&mut self, command: &str) -> Result<()>;

    /// Read one response line (terminator stripped).
    fn read(&mut self) -> Result<String>;

    fn query(&mut self, command: &str) -> Result<String> {
        self.write(command)?;
        self.read()
    }

    /// Query and parse a single numeric reply.
    fn query_f64(&mut self, command: &str) -> Result<f64> {
        let reply = self.query(command)?;
        parse_f64(self.name(), &reply)
    }
}

impl<C: InstrumentChannel + ?Sized> InstrumentChannel for Box<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn write(&mut self, command: &str) -> Result<()> {
        (**self).write(command)
    }

    fn read(&mut self) -> Result<String> {
        (**self).read()
    }
}

/// Parse one numeric reply. `NaN` and infinities are rejected like garbage.
pub(crate) fn parse_f64(channel: &str, reply: &str) -> Result<f64> {
    let reply = reply.trim();
    let value = reply.parse::<f64>().map_err(|e| {
        SweepError::Instrument(format!("{channel}: cannot parse '{reply}' as a number: {e}"))
    })?;
    if !value.is_finite() {
        return Err(SweepError::Instrument(format!(
            "{channel}: reply '{reply}' is not a finite number"
        )));
    }
    Ok(value)
}

/// Parse an ASCII block of comma-separated values (e.g. `:TRAC:DATA?`).
pub(crate) fn parse_f64_list(channel: &str, reply: &str) -> Result<Vec<f64>> {
    reply
        .trim()
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| parse_f64(channel, s))
        .collect()
}
