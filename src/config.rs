//! Simulation configuration with layered resolution, plus cohort file ingestion.
//!
//! Resolution order (highest priority first):
//! 1. CLI flags (`CliOverrides`)
//! 2. Environment variables (`OA_SIM_*`)
//! 3. TOML file passed with `--config`
//! 4. Compiled defaults (the one-year, 100-patient weekly run)

use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::analysis::VarianceAssumption;
use crate::patient::{Covariates, TreatmentKind};
use crate::simulation::{PatientSpec, SimulationSettings, TreatmentPolicy, MAX_HORIZON_DAYS};
use crate::{Result, SimError};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to read {path}: {message}")]
    ReadFailed { path: String, message: String },

    #[error("Failed to parse {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Invalid value for {field}: {message}")]
    ValidationFailed { field: String, message: String },
}

fn invalid(field: &str, message: impl Into<String>) -> SimError {
    SimError::Config(ConfigError::ValidationFailed { field: field.to_string(), message: message.into() })
}

// === SECTIONS ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    pub size: usize,
    pub age: f64,
    pub bmi: f64,
    pub severity: u8,
    /// CSV cohort; replaces the uniform population when set
    pub cohort_file: Option<PathBuf>,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        let cov = Covariates::default();
        PopulationConfig { size: 100, age: cov.age, bmi: cov.bmi, severity: cov.severity, cohort_file: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub cadence_days: u32,
    pub horizon_days: u32,
    pub policy: TreatmentPolicy,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig { cadence_days: 7, horizon_days: 365, policy: TreatmentPolicy::Assigned }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub variance: VarianceAssumption,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub report: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig { dir: PathBuf::from("."), report: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub seed: Option<u64>,
    pub population: PopulationConfig,
    pub schedule: ScheduleConfig,
    pub analysis: AnalysisConfig,
    pub output: OutputConfig,
}

/// Values supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub seed: Option<u64>,
    pub population: Option<usize>,
    pub cadence_days: Option<u32>,
    pub horizon_days: Option<u32>,
    pub policy: Option<TreatmentPolicy>,
    pub variance: Option<VarianceAssumption>,
    pub cohort_file: Option<PathBuf>,
    pub out_dir: Option<PathBuf>,
    pub no_report: bool,
}

impl SimConfig {
    pub fn load(path: Option<&Path>, cli: &CliOverrides) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.apply_cli_overrides(cli);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::FileNotFound { path: path.display().to_string() },
            _ => ConfigError::ReadFailed { path: path.display().to_string(), message: e.to_string() },
        })?;
        Self::parse(&content, &path.display().to_string())
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Self::parse(toml_str, "<string>")
    }

    fn parse(content: &str, origin: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            SimError::Config(ConfigError::ParseError { path: origin.to_string(), message: e.to_string() })
        })
    }

    /// `lookup` is `std::env::var` outside tests
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(key: &str, raw: String) -> Result<T> {
            raw.trim().parse().map_err(|_| invalid(key, format!("cannot parse '{}'", raw)))
        }

        if let Some(v) = lookup("OA_SIM_SEED") {
            self.seed = Some(parsed("OA_SIM_SEED", v)?);
        }
        if let Some(v) = lookup("OA_SIM_POPULATION") {
            self.population.size = parsed("OA_SIM_POPULATION", v)?;
        }
        if let Some(v) = lookup("OA_SIM_HORIZON") {
            self.schedule.horizon_days = parsed("OA_SIM_HORIZON", v)?;
        }
        if let Some(v) = lookup("OA_SIM_CADENCE") {
            self.schedule.cadence_days = parsed("OA_SIM_CADENCE", v)?;
        }
        Ok(())
    }

    pub fn apply_cli_overrides(&mut self, cli: &CliOverrides) {
        if cli.seed.is_some() { self.seed = cli.seed; }
        if let Some(n) = cli.population { self.population.size = n; }
        if let Some(c) = cli.cadence_days { self.schedule.cadence_days = c; }
        if let Some(h) = cli.horizon_days { self.schedule.horizon_days = h; }
        if let Some(p) = cli.policy { self.schedule.policy = p; }
        if let Some(v) = cli.variance { self.analysis.variance = v; }
        if cli.cohort_file.is_some() { self.population.cohort_file = cli.cohort_file.clone(); }
        if let Some(d) = &cli.out_dir { self.output.dir = d.clone(); }
        if cli.no_report { self.output.report = false; }
    }

    pub fn validate(&self) -> Result<()> {
        if self.schedule.cadence_days == 0 {
            return Err(SimError::InvalidCadence(0));
        }
        if self.schedule.horizon_days > MAX_HORIZON_DAYS {
            return Err(invalid(
                "schedule.horizon_days",
                format!("{} exceeds the {} day limit", self.schedule.horizon_days, MAX_HORIZON_DAYS),
            ));
        }
        if self.population.cohort_file.is_none() && self.population.size == 0 {
            return Err(SimError::EmptyPopulation);
        }
        validate_covariates("population", &self.covariates())?;
        Ok(())
    }

    pub fn covariates(&self) -> Covariates {
        Covariates { age: self.population.age, bmi: self.population.bmi, severity: self.population.severity }
    }

    /// Configured seed, or a fresh one from the thread RNG
    pub fn seed_or_random(&self) -> u64 {
        match self.seed {
            Some(s) => s,
            None => {
                let s: u64 = rand::thread_rng().gen();
                tracing::info!(seed = s, "no seed configured, drew one");
                s
            }
        }
    }

    pub fn settings(&self, seed: u64) -> SimulationSettings {
        SimulationSettings { horizon_days: self.schedule.horizon_days, policy: self.schedule.policy, seed }
    }

    pub fn patient_specs(&self) -> Result<Vec<PatientSpec>> {
        match &self.population.cohort_file {
            Some(path) => read_cohort_csv(path, self.schedule.cadence_days),
            None => Ok(PatientSpec::uniform_population(
                self.population.size,
                self.covariates(),
                self.schedule.cadence_days,
            )),
        }
    }
}

/// Age and BMI positive and finite, severity 1-5. `field` prefixes the error.
pub fn validate_covariates(field: &str, cov: &Covariates) -> Result<()> {
    if !(cov.age > 0.0 && cov.age.is_finite()) {
        return Err(invalid(&format!("{}.age", field), "must be positive"));
    }
    if !(cov.bmi > 0.0 && cov.bmi.is_finite()) {
        return Err(invalid(&format!("{}.bmi", field), "must be positive"));
    }
    if !(1..=5).contains(&cov.severity) {
        return Err(invalid(&format!("{}.severity", field), "must be between 1 and 5"));
    }
    Ok(())
}

// === COHORT FILE ===

#[derive(Debug, Deserialize)]
struct CohortRow {
    patient_id: usize,
    age: f64,
    bmi: f64,
    severity: u8,
    treatment: String,
    #[serde(default)]
    cadence_days: Option<u32>,
    #[serde(default)]
    initial_pain: Option<f64>,
    #[serde(default)]
    initial_mobility: Option<f64>,
}

/// Read `patient_id,age,bmi,severity,treatment[,cadence_days][,initial_pain][,initial_mobility]`
pub fn read_cohort_csv(path: &Path, default_cadence: u32) -> Result<Vec<PatientSpec>> {
    let reader = ReaderBuilder::new().has_headers(true).flexible(true).trim(csv::Trim::All).from_path(path)?;
    parse_cohort(reader, default_cadence)
}

fn parse_cohort<R: std::io::Read>(mut reader: csv::Reader<R>, default_cadence: u32) -> Result<Vec<PatientSpec>> {
    let mut specs = Vec::new();

    for (i, result) in reader.deserialize().enumerate() {
        let row_num = i + 2; // header is row 1
        let row: CohortRow = result?;

        let treatment = row.treatment.parse::<TreatmentKind>().map_err(|e| {
            tracing::warn!(row = row_num, value = %row.treatment, "unknown treatment kind in cohort file");
            e
        })?;
        let covariates = Covariates { age: row.age, bmi: row.bmi, severity: row.severity };
        validate_covariates(&format!("cohort row {}", row_num), &covariates)?;

        let cadence_days = row.cadence_days.unwrap_or(default_cadence);
        if cadence_days == 0 {
            return Err(SimError::InvalidCadence(0));
        }

        let initial_state = match (row.initial_pain, row.initial_mobility) {
            (Some(p), Some(m)) => {
                if !(p.is_finite() && p >= 0.0) {
                    return Err(invalid(&format!("cohort row {}.initial_pain", row_num), "must be finite and non-negative"));
                }
                if !m.is_finite() {
                    return Err(invalid(&format!("cohort row {}.initial_mobility", row_num), "must be finite"));
                }
                Some((p, m))
            }
            (None, None) => None,
            _ => return Err(invalid(
                &format!("cohort row {}", row_num),
                "initial_pain and initial_mobility must be given together",
            )),
        };

        specs.push(PatientSpec { patient_id: row.patient_id, covariates, treatment, cadence_days, initial_state });
    }

    tracing::info!(patients = specs.len(), "loaded cohort file");
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn cohort_reader(data: &str) -> csv::Reader<&[u8]> {
        ReaderBuilder::new().has_headers(true).flexible(true).trim(csv::Trim::All).from_reader(data.as_bytes())
    }

    #[test]
    fn test_defaults_match_one_year_run() {
        let c = SimConfig::default();
        assert_eq!(c.population.size, 100);
        assert_eq!(c.schedule.cadence_days, 7);
        assert_eq!(c.schedule.horizon_days, 365);
        assert_eq!(c.schedule.policy, TreatmentPolicy::Assigned);
        assert_eq!(c.analysis.variance, VarianceAssumption::Pooled);
        assert!(c.seed.is_none());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let c = SimConfig::from_toml(
            r#"
            seed = 42
            [schedule]
            horizon_days = 14
            policy = "weekday-alternation"
            [analysis]
            variance = "welch"
            "#,
        )
        .unwrap();
        assert_eq!(c.seed, Some(42));
        assert_eq!(c.schedule.horizon_days, 14);
        assert_eq!(c.schedule.cadence_days, 7);
        assert_eq!(c.schedule.policy, TreatmentPolicy::WeekdayAlternation);
        assert_eq!(c.analysis.variance, VarianceAssumption::Welch);
        assert_eq!(c.population.size, 100);
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let err = SimConfig::from_toml("[schedule]\nhorizon_days = \"soon\"").unwrap_err();
        assert!(matches!(err, SimError::Config(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_missing_file() {
        let err = SimConfig::from_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, SimError::Config(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_layer_precedence() {
        let mut c = SimConfig::from_toml("seed = 1\n[population]\nsize = 10\n").unwrap();
        let env: HashMap<&str, &str> = [("OA_SIM_SEED", "2"), ("OA_SIM_HORIZON", "30")].into_iter().collect();
        c.apply_env_overrides(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(c.seed, Some(2));
        assert_eq!(c.schedule.horizon_days, 30);

        let cli = CliOverrides { seed: Some(3), population: Some(4), no_report: true, ..Default::default() };
        c.apply_cli_overrides(&cli);
        assert_eq!(c.seed, Some(3));
        assert_eq!(c.population.size, 4);
        assert_eq!(c.schedule.horizon_days, 30);
        assert!(!c.output.report);
    }

    #[test]
    fn test_bad_env_value() {
        let mut c = SimConfig::default();
        let err = c.apply_env_overrides(|k| (k == "OA_SIM_CADENCE").then(|| "weekly".to_string())).unwrap_err();
        assert!(matches!(err, SimError::Config(ConfigError::ValidationFailed { .. })));
    }

    #[test]
    fn test_validation_errors() {
        let mut c = SimConfig::default();
        c.schedule.cadence_days = 0;
        assert!(matches!(c.validate(), Err(SimError::InvalidCadence(0))));

        let mut c = SimConfig::default();
        c.population.size = 0;
        assert!(matches!(c.validate(), Err(SimError::EmptyPopulation)));

        let mut c = SimConfig::default();
        c.population.severity = 6;
        assert!(matches!(c.validate(), Err(SimError::Config(ConfigError::ValidationFailed { .. }))));
    }

    #[test]
    fn test_uniform_specs_use_parity() {
        let mut c = SimConfig::default();
        c.population.size = 4;
        let specs = c.patient_specs().unwrap();
        let kinds: Vec<TreatmentKind> = specs.iter().map(|s| s.treatment).collect();
        assert_eq!(kinds, vec![
            TreatmentKind::Physiotherapy, TreatmentKind::AntiInflammatory,
            TreatmentKind::Physiotherapy, TreatmentKind::AntiInflammatory,
        ]);
        assert!(specs.iter().all(|s| s.cadence_days == 7 && s.initial_state.is_none()));
    }

    #[test]
    fn test_cohort_parse() {
        let data = "patient_id,age,bmi,severity,treatment,cadence_days,initial_pain,initial_mobility\n\
                    0,50,28.5,2,physiotherapy,,,\n\
                    1,63,31,4,NSAID,14,6.5,25\n";
        let specs = parse_cohort(cohort_reader(data), 7).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].treatment, TreatmentKind::Physiotherapy);
        assert_eq!(specs[0].cadence_days, 7);
        assert_eq!(specs[0].initial_state, None);
        assert_eq!(specs[1].treatment, TreatmentKind::AntiInflammatory);
        assert_eq!(specs[1].cadence_days, 14);
        assert_eq!(specs[1].initial_state, Some((6.5, 25.0)));
        assert_eq!(specs[1].covariates.severity, 4);
    }

    #[test]
    fn test_cohort_minimal_columns() {
        let data = "patient_id,age,bmi,severity,treatment\n5,45,32,3,physio\n";
        let specs = parse_cohort(cohort_reader(data), 3).unwrap();
        assert_eq!(specs[0].patient_id, 5);
        assert_eq!(specs[0].cadence_days, 3);
    }

    #[test]
    fn test_cohort_unknown_treatment() {
        let data = "patient_id,age,bmi,severity,treatment\n0,45,32,3,acupuncture\n";
        match parse_cohort(cohort_reader(data), 7) {
            Err(SimError::InvalidTreatmentKind(s)) => assert_eq!(s, "acupuncture"),
            other => panic!("expected InvalidTreatmentKind, got {:?}", other),
        }
    }

    #[test]
    fn test_cohort_half_initial_state() {
        let data = "patient_id,age,bmi,severity,treatment,initial_pain\n0,45,32,3,physio,6\n";
        assert!(matches!(
            parse_cohort(cohort_reader(data), 7),
            Err(SimError::Config(ConfigError::ValidationFailed { .. }))
        ));
    }

    #[test]
    fn test_cohort_non_finite_initial_state() {
        for (pain, mobility) in [("6", "NaN"), ("inf", "25"), ("-1", "25"), ("6", "-inf")] {
            let data = format!(
                "patient_id,age,bmi,severity,treatment,cadence_days,initial_pain,initial_mobility\n0,45,32,3,physio,7,{},{}\n",
                pain, mobility
            );
            match parse_cohort(cohort_reader(&data), 7) {
                Err(SimError::Config(ConfigError::ValidationFailed { field, .. })) => assert!(field.starts_with("cohort row 2")),
                other => panic!("expected ValidationFailed for ({}, {}), got {:?}", pain, mobility, other),
            }
        }
    }

    #[test]
    fn test_validate_covariates_bounds() {
        assert!(validate_covariates("single", &Covariates::default()).is_ok());
        let bad = [
            Covariates { severity: 0, ..Covariates::default() },
            Covariates { bmi: -3.0, ..Covariates::default() },
            Covariates { age: f64::NAN, ..Covariates::default() },
        ];
        for cov in bad {
            match validate_covariates("single", &cov) {
                Err(SimError::Config(ConfigError::ValidationFailed { field, .. })) => assert!(field.starts_with("single.")),
                other => panic!("expected ValidationFailed for {:?}, got {:?}", cov, other),
            }
        }
    }

    #[test]
    fn test_horizon_limit() {
        let mut c = SimConfig::default();
        c.schedule.horizon_days = MAX_HORIZON_DAYS;
        assert!(c.validate().is_ok());
        c.schedule.horizon_days = u32::MAX;
        match c.validate() {
            Err(SimError::Config(ConfigError::ValidationFailed { field, .. })) => assert_eq!(field, "schedule.horizon_days"),
            other => panic!("expected ValidationFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_unreadable_config_keeps_io_message() {
        let dir = tempfile::tempdir().unwrap();
        match SimConfig::from_file(dir.path()) {
            Err(SimError::Config(ConfigError::ReadFailed { message, .. })) => assert!(!message.is_empty()),
            other => panic!("expected ReadFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_cohort_file_via_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "patient_id,age,bmi,severity,treatment").unwrap();
        writeln!(file, "0,45,32,3,physiotherapy").unwrap();
        writeln!(file, "1,45,32,3,anti-inflammatory").unwrap();
        file.flush().unwrap();

        let mut c = SimConfig::default();
        c.population.size = 0;
        c.apply_cli_overrides(&CliOverrides { cohort_file: Some(file.path().to_path_buf()), ..Default::default() });
        assert!(c.validate().is_ok());
        let specs = c.patient_specs().unwrap();
        assert_eq!(specs.len(), 2);
    }
}
