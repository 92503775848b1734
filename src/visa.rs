//! VISA transport: discovery, sessions and line-oriented SCPI I/O.
//!
//! Every VISA session is closed when the resource manager that opened it
//! goes away, so [`VisaSession`] keeps the manager alive for as long as the
//! bench is in use.

use std::ffi::CString;
use std::io::{BufRead, BufReader, Write};
use std::time::Duration;

use log::{debug, info};
use visa_rs::prelude::*;
use visa_rs::{VisaString, io_to_vs_err};

use crate::bench::{Bench, role_names};
use crate::channel::InstrumentChannel;
use crate::config::SweepConfig;
use crate::error::{Result, SweepError};

pub struct VisaChannel {
    name: String,
    instr: Instrument,
}

impl InstrumentChannel for VisaChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, command: &str) -> Result<()> {
        debug!("{} <- {command}", self.name);
        self.instr
            .write_all(format!("{command}\n").as_bytes())
            .map_err(io_to_vs_err)?;
        Ok(())
    }

    fn read(&mut self) -> Result<String> {
        let mut response = String::new();
        {
            // the reader must be dropped before the session is written again
            let mut reader = BufReader::new(&self.instr);
            reader.read_line(&mut response).map_err(io_to_vs_err)?;
        }
        let response = response.trim_end().to_string();
        debug!("{} -> {response}", self.name);
        Ok(response)
    }
}

fn visa_string(resource: &str) -> Result<VisaString> {
    CString::new(resource)
        .map(VisaString::from)
        .map_err(|e| SweepError::Config(format!("invalid resource string '{resource}': {e}")))
}

/// Every `INSTR` resource the resource manager can see, in its order.
pub fn list_endpoints(rm: &DefaultRM) -> Result<Vec<VisaString>> {
    let mut list = match rm.find_res_list(&visa_string("?*INSTR")?) {
        Ok(list) => list,
        Err(e) => {
            // VISA reports "no match" as an error
            debug!("Resource search returned {e}");
            return Ok(Vec::new());
        }
    };
    let mut found = Vec::new();
    while let Some(resource) = list.find_next()? {
        found.push(resource);
    }
    Ok(found)
}

pub struct VisaSession {
    pub bench: Bench<VisaChannel>,
    // declared after `bench` so sessions close before the manager
    _rm: DefaultRM,
}

impl VisaSession {
    /// Resolve, open and prepare every instrument the topology needs.
    pub fn open(config: &SweepConfig) -> Result<Self> {
        let rm = DefaultRM::new()?;
        let resources = if config.bench.resources.is_empty() {
            list_endpoints(&rm)?
        } else {
            config
                .bench
                .resources
                .iter()
                .map(|r| visa_string(r))
                .collect::<Result<Vec<_>>>()?
        };
        info!("Resource list: {resources:?}");

        let expected = config.topology.instrument_count();
        if resources.len() != expected {
            return Err(SweepError::EndpointDiscovery {
                expected,
                found: resources.len(),
            });
        }

        let timeout = Duration::from_millis(config.bench.timeout_ms);
        let channels = resources
            .iter()
            .zip(role_names(config.topology))
            .map(|(resource, role)| {
                let instr = rm
                    .open(resource, AccessMode::NO_LOCK, timeout)
                    .map_err(|e| SweepError::Connection {
                        resource: format!("{resource:?}"),
                        reason: e.to_string(),
                    })?;
                info!("{role} connected at {resource:?}");
                Ok(VisaChannel {
                    name: role.to_string(),
                    instr,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut bench = Bench::from_channels(channels, config)?;
        bench.prepare(&config.bench.bias_output)?;
        info!("Initialization complete, all instruments connected");
        Ok(Self { bench, _rm: rm })
    }
}
