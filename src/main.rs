//! oa-sim: osteoarthritis treatment cohort simulation
//!
//! Runs the population simulation, compares the treatment cohorts and writes
//! the chart and tables.

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use oa_sim::config::{validate_covariates, CliOverrides};
use oa_sim::report::{self, ChartSink, HtmlReport};
use oa_sim::sim_core::{get_bool, get_input_u32, get_optional_u64};
use oa_sim::{
    compare_cohorts, Covariates, Outcome, Patient, PopulationSimulation, SimConfig, TreatmentAssignment,
    TreatmentKind, TreatmentPolicy, TreatmentScheduler, VarianceAssumption,
};

#[derive(Parser)]
#[command(name = "oa-sim")]
#[command(version)]
#[command(about = "Osteoarthritis treatment cohort simulation", long_about = None)]
struct Cli {
    /// Log at debug level (RUST_LOG still wins)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a population and compare the treatment cohorts
    Run(RunArgs),

    /// Drive a single patient with one scheduler
    Single(SingleArgs),
}

#[derive(Args)]
struct RunArgs {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Cohort CSV (patient_id,age,bmi,severity,treatment[,cadence_days][,initial_pain][,initial_mobility])
    #[arg(long, value_name = "FILE")]
    cohort: Option<PathBuf>,

    /// Population size (ignored with --cohort)
    #[arg(short = 'n', long)]
    population: Option<usize>,

    /// Days between sessions
    #[arg(long)]
    cadence: Option<u32>,

    /// Simulated days
    #[arg(long)]
    horizon: Option<u32>,

    #[arg(short, long)]
    seed: Option<u64>,

    /// assigned | weekday-alternation
    #[arg(long)]
    policy: Option<TreatmentPolicy>,

    /// pooled | welch
    #[arg(long)]
    variance: Option<VarianceAssumption>,

    /// Directory for the chart and CSV tables
    #[arg(short, long, value_name = "DIR")]
    out_dir: Option<PathBuf>,

    /// Skip chart and table output
    #[arg(long)]
    no_report: bool,
}

#[derive(Args)]
struct SingleArgs {
    #[arg(long, default_value_t = 1)]
    id: usize,

    #[arg(long, default_value_t = 45.0)]
    age: f64,

    #[arg(long, default_value_t = 32.0)]
    bmi: f64,

    #[arg(long, default_value_t = 3)]
    severity: u8,

    /// physiotherapy | anti-inflammatory
    #[arg(short, long, default_value = "physiotherapy")]
    treatment: String,

    #[arg(long, default_value_t = 7)]
    cadence: u32,

    #[arg(long, default_value_t = 365)]
    horizon: u32,

    #[arg(short, long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    match cli.command {
        Some(Commands::Run(args)) => {
            let overrides = CliOverrides {
                seed: args.seed,
                population: args.population,
                cadence_days: args.cadence,
                horizon_days: args.horizon,
                policy: args.policy,
                variance: args.variance,
                cohort_file: args.cohort,
                out_dir: args.out_dir,
                no_report: args.no_report,
            };
            let config = SimConfig::load(args.config.as_deref(), &overrides)?;
            run_population(&config)
        }
        Some(Commands::Single(args)) => run_single(&args),
        None => run_interactive(),
    }
}

fn run_population(config: &SimConfig) -> Result<()> {
    let seed = config.seed_or_random();
    let specs = config.patient_specs().context("building population")?;
    let outcome = PopulationSimulation::new(specs, config.settings(seed))?.run()?;

    let variance = config.analysis.variance;
    let comparisons: Vec<_> = [Outcome::PainLevel, Outcome::MobilityScore]
        .into_iter()
        .map(|o| {
            let result = compare_cohorts(&outcome.final_records, o, variance);
            if let Err(e) = &result {
                tracing::warn!(outcome = %o, error = %e, "cohort comparison unavailable");
            }
            (o, result)
        })
        .collect();

    let summary = report::summary_text(&outcome, &comparisons);
    print!("\n{}", summary);

    if config.output.report {
        let dir = &config.output.dir;
        let tables = report::write_tables(dir, &outcome)
            .with_context(|| format!("writing tables to {}", dir.display()))?;
        let mut chart = HtmlReport::new(dir.join(report::REPORT_FILE));
        chart.render(&outcome.aggregates, &summary)
            .with_context(|| format!("writing {}", chart.path().display()))?;
        for path in tables.iter().map(|p| p.as_path()).chain(std::iter::once(chart.path())) {
            println!(">> {}", path.display());
        }
    }
    Ok(())
}

fn run_single(args: &SingleArgs) -> Result<()> {
    let kind: TreatmentKind = args.treatment.parse()?;
    let assignment = TreatmentAssignment::new(args.id, kind, args.cadence)?;
    let covariates = Covariates { age: args.age, bmi: args.bmi, severity: args.severity };
    validate_covariates("single", &covariates)?;

    let seed = args.seed.unwrap_or_else(|| SimConfig::default().seed_or_random());
    let mut rng = StdRng::seed_from_u64(seed);
    let mut patient = Patient::create(args.id, covariates, &mut rng);
    let start = patient.snapshot();
    let mut scheduler = TreatmentScheduler::new(assignment);
    let events = scheduler.run_until(&mut patient, args.horizon, &mut rng);
    let end = patient.snapshot();

    println!("\nPatient {} ({}, every {} days, {} days, seed {})", args.id, kind, args.cadence, args.horizon, seed);
    println!("Sessions:  {}", events.len());
    println!("Pain:      {:.2} -> {:.2}", start.pain_level, end.pain_level);
    println!("Mobility:  {:.2} -> {:.2}", start.mobility_score, end.mobility_score);
    match events.iter().find(|e| e.fallback) {
        Some(e) => println!("Fallback:  yes (first at day {})", e.day),
        None => println!("Fallback:  no"),
    }
    Ok(())
}

fn run_interactive() -> Result<()> {
    println!("\n==========================================");
    println!("   OSTEOARTHRITIS TREATMENT SIMULATION");
    println!("==========================================\n");

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut out = io::stdout();

    let defaults = SimConfig::default();
    let population = get_input_u32(&mut input, &mut out, "Number of patients (Enter for 100): ", defaults.population.size as u32)?;
    let horizon = get_input_u32(&mut input, &mut out, "Simulated days (Enter for 365): ", defaults.schedule.horizon_days)?;
    let cadence = get_input_u32(&mut input, &mut out, "Days between sessions (Enter for 7): ", defaults.schedule.cadence_days)?;
    let seed = get_optional_u64(&mut input, &mut out, "Seed (Enter for random): ")?;
    let alternate = get_bool(&mut input, &mut out, "Use weekday alternation instead of assigned treatments?", false)?;
    let report = get_bool(&mut input, &mut out, "Write chart and tables to the current directory?", true)?;

    let overrides = CliOverrides {
        seed,
        population: Some(population as usize),
        cadence_days: Some(cadence),
        horizon_days: Some(horizon),
        policy: alternate.then_some(TreatmentPolicy::WeekdayAlternation),
        no_report: !report,
        ..Default::default()
    };
    let config = SimConfig::load(None, &overrides)?;
    run_population(&config)
}
