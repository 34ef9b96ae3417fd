//! # oa-sim
//!
//! Discrete-event simulation of osteoarthritis patients receiving periodic
//! treatment (physiotherapy or an anti-inflammatory), followed by a
//! two-sample comparison of the treatment cohorts.
//!
//! ## Layout
//! - `patient`: clinical state and update rules
//! - `scheduler`: per-patient periodic treatment delivery
//! - `simulation`: population driver, day clock and daily aggregates
//! - `analysis`: cohort partition and t-test
//! - `report`: chart sink and CSV exports
//! - `config`: layered configuration and cohort file ingestion

pub mod analysis;
pub mod config;
pub mod patient;
pub mod report;
pub mod scheduler;
pub mod sim_core;
pub mod simulation;

pub use analysis::{compare_cohorts, CohortComparison, Outcome, TTestResult, VarianceAssumption};
pub use config::{ConfigError, SimConfig};
pub use patient::{Covariates, Patient, PatientSnapshot, TreatmentKind};
pub use scheduler::{TreatmentAssignment, TreatmentEvent, TreatmentScheduler};
pub use simulation::{DailyAggregate, PopulationSimulation, SimulationOutcome, TreatmentPolicy};

/// Result type for simulation operations
pub type Result<T> = std::result::Result<T, SimError>;

/// Main error type for the simulation
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("Invalid treatment kind: {0:?}")]
    InvalidTreatmentKind(String),

    #[error("Population is empty")]
    EmptyPopulation,

    #[error("Insufficient cohort size: {cohort} has {size} patients, need at least {required}")]
    InsufficientCohortSize {
        cohort: TreatmentKind,
        size: usize,
        required: usize,
    },

    #[error("Invalid cadence: {0} days (must be at least 1)")]
    InvalidCadence(u32),

    #[error("Duplicate patient id: {0}")]
    DuplicatePatientId(usize),

    #[error("Degenerate variance: both cohorts have zero spread (means {mean_a:.3} vs {mean_b:.3})")]
    DegenerateVariance { mean_a: f64, mean_b: f64 },

    #[error("Distribution error: {0}")]
    Distribution(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
