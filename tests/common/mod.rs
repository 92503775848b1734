#![allow(dead_code)]

use freq_sweep::bench::Bench;
use freq_sweep::config::{SweepConfig, Topology};
use freq_sweep::frequency::FrequencyRange;
use freq_sweep::mock::{MockChannel, Transcript};

pub const VS: &str = "vs";
pub const SG: &str = "sg";
pub const SA: &str = "sa";
pub const MARKER_QUERY: &str = "CALC:MARK:Y?";

/// Default configuration with every settling delay removed.
pub fn fast_config(range: FrequencyRange) -> SweepConfig {
    let mut config = SweepConfig::default();
    config.range = range;
    config.analyzer.query_delay_ms = 0;
    config.analyzer.trace_delay_ms = 0;
    config.search.settle_ms = 0;
    config.search.average_ms = 0;
    config.search.advance_ms = 0;
    config.measurement.settle_ms = 0;
    config.measurement.average_ms = 0;
    config.measurement.advance_ms = 0;
    config.fluctuation.warmup_ms = 0;
    config.fluctuation.interval_ms = 0;
    config
}

pub fn powers<I: IntoIterator<Item = f64>>(values: I) -> Vec<String> {
    values.into_iter().map(|p| p.to_string()).collect()
}

/// Mock bench in role order; `analyzer` carries the scripted replies.
pub fn bench(
    transcript: &Transcript,
    config: &SweepConfig,
    analyzer: MockChannel,
) -> Bench<MockChannel> {
    let mut channels = Vec::new();
    if config.topology == Topology::ThreeInstrument {
        channels.push(MockChannel::new(VS, transcript));
    }
    channels.push(MockChannel::new(SG, transcript));
    channels.push(analyzer);
    Bench::from_channels(channels, config).expect("bench")
}

/// The command issued immediately before each occurrence of
/// `(channel, text)`.
pub fn preceding(transcript: &Transcript, channel: &str, text: &str) -> Vec<(String, String)> {
    let commands = transcript.commands();
    transcript
        .positions(channel, text)
        .into_iter()
        .map(|p| {
            let prev = &commands[p - 1];
            (prev.channel.clone(), prev.text.clone())
        })
        .collect()
}

/// Voltages written with `VOLT`, in order.
pub fn voltages_written(transcript: &Transcript) -> Vec<f64> {
    transcript
        .sent_to(VS)
        .iter()
        .filter_map(|c| c.strip_prefix("VOLT "))
        .map(|v| v.parse().expect("numeric voltage"))
        .collect()
}
