use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::{error, info};

use freq_sweep::bench::Bench;
use freq_sweep::calibration::BiasCalibrator;
use freq_sweep::config::{SweepConfig, Topology};
use freq_sweep::fluctuation::FluctuationSampler;
use freq_sweep::record::{CALIBRATION_HEADER, FLUCTUATION_HEADER, ResultLog, SWEEP_HEADER};
use freq_sweep::session::Session;
use freq_sweep::sweep::{SweepRunner, VoltagePlan};
use freq_sweep::Result;

#[cfg(feature = "visa")]
type Channel = freq_sweep::visa::VisaChannel;
#[cfg(not(feature = "visa"))]
type Channel = Box<dyn freq_sweep::channel::InstrumentChannel>;

#[derive(Parser)]
#[command(name = "freq-sweep")]
#[command(about = "Bias calibration and frequency sweeps over SCPI instruments", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the instrument endpoints the VISA library can see
    List,

    /// Find the maximum-power bias voltage for every frequency and save the map
    Calibrate,

    /// Sweep the frequency range, biasing each point from the saved map
    Sweep {
        /// Apply this voltage at every point instead of the calibration
        #[arg(long)]
        fixed_voltage: Option<f64>,
    },

    /// Repeatedly sample raw power at a single frequency
    Fluctuation {
        #[arg(long)]
        samples: Option<usize>,

        /// Physical frequency in GHz (default: range start)
        #[arg(long)]
        frequency: Option<f64>,

        #[arg(long)]
        voltage: Option<f64>,
    },

    /// Calibrate, then sweep with the fresh calibration (two-instrument benches sweep unbiased)
    Run,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = SweepConfig::load(cli.config.as_deref())?;
    std::fs::create_dir_all(&config.output.directory)?;
    let mut session = Session::new(config.map_path());

    match cli.command {
        Commands::List => list_endpoints(),
        Commands::Calibrate => with_bench(&config, |bench| calibrate(bench, &config, &mut session)),
        Commands::Sweep { fixed_voltage } => {
            // resolve the plan before touching any instrument
            let plan = voltage_plan(&config, &session, fixed_voltage)?;
            with_bench(&config, |bench| sweep(bench, &config, plan))
        }
        Commands::Fluctuation {
            samples,
            frequency,
            voltage,
        } => with_bench(&config, |bench| {
            let count = samples.unwrap_or(config.fluctuation.samples);
            let frequency = frequency
                .or(config.fluctuation.frequency)
                .unwrap_or(config.range.start);
            let voltage = voltage.or(config.fluctuation.voltage);
            fluctuation(bench, &config, frequency, voltage, count)
        }),
        Commands::Run => with_bench(&config, |bench| {
            if config.topology.has_voltage_source() {
                calibrate(bench, &config, &mut session)?;
            }
            let plan = voltage_plan(&config, &session, None)?;
            sweep(bench, &config, plan)
        }),
    }
}

fn voltage_plan(
    config: &SweepConfig,
    session: &Session,
    fixed_voltage: Option<f64>,
) -> Result<VoltagePlan> {
    Ok(match (config.topology, fixed_voltage) {
        (Topology::TwoInstrument, None) => VoltagePlan::Unbiased,
        (_, Some(volts)) => VoltagePlan::Fixed(volts),
        (Topology::ThreeInstrument, None) => VoltagePlan::Calibrated(session.voltage_map()?),
    })
}

fn calibrate(bench: &mut Bench<Channel>, config: &SweepConfig, session: &mut Session) -> Result<()> {
    let mut log = ResultLog::create(&config.calibration_log_path(), &CALIBRATION_HEADER)?;
    let map = BiasCalibrator::new(bench, config).calibrate(&mut log, session.map_path())?;
    session.record_calibration(map);
    Ok(())
}

fn sweep(bench: &mut Bench<Channel>, config: &SweepConfig, plan: VoltagePlan) -> Result<()> {
    let mut log = ResultLog::create(&config.sweep_log_path(), &SWEEP_HEADER)?;
    let mut points = 0;
    for record in SweepRunner::new(bench, config).sweep(plan, &mut log)? {
        record?;
        points += 1;
    }
    info!(
        "Sweep complete: {points} points saved to {}",
        config.sweep_log_path().display()
    );
    Ok(())
}

fn fluctuation(
    bench: &mut Bench<Channel>,
    config: &SweepConfig,
    frequency: f64,
    voltage: Option<f64>,
    count: usize,
) -> Result<()> {
    let mut log = ResultLog::create(&config.fluctuation_log_path(), &FLUCTUATION_HEADER)?;
    let sampler = FluctuationSampler::new(bench, config);
    let powers = sampler
        .sample(frequency, voltage, count, &mut log)?
        .map(|s| s.map(|s| s.power))
        .collect::<Result<Vec<f64>>>()?;
    info!(
        "Fluctuation test done: {} samples saved to {}",
        powers.len(),
        config.fluctuation_log_path().display()
    );
    Ok(())
}

/// Open the bench, run `f`, and always leave the voltage source at 0 V.
#[cfg(feature = "visa")]
fn with_bench<F>(config: &SweepConfig, f: F) -> Result<()>
where
    F: FnOnce(&mut Bench<Channel>) -> Result<()>,
{
    let mut session = freq_sweep::visa::VisaSession::open(config)?;
    let result = f(&mut session.bench);
    let closed = session.bench.close();
    result.and(closed)
}

#[cfg(not(feature = "visa"))]
fn with_bench<F>(_config: &SweepConfig, _f: F) -> Result<()>
where
    F: FnOnce(&mut Bench<Channel>) -> Result<()>,
{
    Err(visa_disabled())
}

#[cfg(feature = "visa")]
fn list_endpoints() -> Result<()> {
    use visa_rs::DefaultRM;

    let rm = DefaultRM::new()?;
    let endpoints = freq_sweep::visa::list_endpoints(&rm)?;
    info!("{} endpoints found", endpoints.len());
    for endpoint in endpoints {
        println!("{endpoint:?}");
    }
    Ok(())
}

#[cfg(not(feature = "visa"))]
fn list_endpoints() -> Result<()> {
    Err(visa_disabled())
}

#[cfg(not(feature = "visa"))]
fn visa_disabled() -> freq_sweep::SweepError {
    freq_sweep::SweepError::Config("VISA support not enabled. Rebuild with --features visa".to_string())
}
