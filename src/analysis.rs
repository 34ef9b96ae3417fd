//! Cohort comparison: partition the final population by assigned treatment
//! and run an unpaired two-sample t-test on an outcome.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::patient::TreatmentKind;
use crate::sim_core::{mean, sample_variance};
use crate::simulation::PatientRecord;
use crate::{Result, SimError};

/// Both cohorts need a sample variance
pub const MIN_COHORT_SIZE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    PainLevel,
    MobilityScore,
}

impl Outcome {
    pub fn of(self, record: &PatientRecord) -> f64 {
        match self {
            Outcome::PainLevel => record.pain_level,
            Outcome::MobilityScore => record.mobility_score,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::PainLevel => f.write_str("pain level"),
            Outcome::MobilityScore => f.write_str("mobility score"),
        }
    }
}

/// Pooled is Student's equal-variance test; Welch drops that assumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VarianceAssumption {
    #[default]
    Pooled,
    Welch,
}

impl fmt::Display for VarianceAssumption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarianceAssumption::Pooled => f.write_str("pooled"),
            VarianceAssumption::Welch => f.write_str("welch"),
        }
    }
}

impl FromStr for VarianceAssumption {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pooled" | "student" => Ok(VarianceAssumption::Pooled),
            "welch" => Ok(VarianceAssumption::Welch),
            other => Err(format!("unknown variance assumption '{}' (expected pooled|welch)", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TTestResult {
    pub statistic: f64,
    /// Two-sided
    pub p_value: f64,
    pub degrees_of_freedom: f64,
    pub mean_difference: f64,
    pub variance: VarianceAssumption,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CohortSummary {
    pub treatment: TreatmentKind,
    pub n: usize,
    pub mean: f64,
    pub sd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortComparison {
    pub outcome: Outcome,
    pub physiotherapy: CohortSummary,
    pub anti_inflammatory: CohortSummary,
    /// physiotherapy minus anti-inflammatory
    pub test: TTestResult,
}

/// Final records split by assigned treatment. With the default seeding this
/// is the id-parity split (even = physiotherapy).
#[derive(Debug, Clone, Default)]
pub struct Cohorts<'a> {
    pub physiotherapy: Vec<&'a PatientRecord>,
    pub anti_inflammatory: Vec<&'a PatientRecord>,
}

impl<'a> Cohorts<'a> {
    pub fn partition(records: &'a [PatientRecord]) -> Self {
        let mut cohorts = Cohorts::default();
        for r in records {
            match r.treatment {
                TreatmentKind::Physiotherapy => cohorts.physiotherapy.push(r),
                TreatmentKind::AntiInflammatory => cohorts.anti_inflammatory.push(r),
            }
        }
        cohorts
    }

    pub fn get(&self, kind: TreatmentKind) -> &[&'a PatientRecord] {
        match kind {
            TreatmentKind::Physiotherapy => &self.physiotherapy,
            TreatmentKind::AntiInflammatory => &self.anti_inflammatory,
        }
    }

    pub fn values(&self, kind: TreatmentKind, outcome: Outcome) -> Vec<f64> {
        self.get(kind).iter().map(|r| outcome.of(r)).collect()
    }

    fn summary(&self, kind: TreatmentKind, outcome: Outcome) -> CohortSummary {
        let v = self.values(kind, outcome);
        CohortSummary {
            treatment: kind,
            n: v.len(),
            mean: mean(&v).unwrap_or(f64::NAN),
            sd: sample_variance(&v).map_or(f64::NAN, f64::sqrt),
        }
    }
}

/// Unpaired two-sample t-test of the physiotherapy sample `a` against the
/// anti-inflammatory sample `b`. Errors name the cohort by that position.
fn two_sample_t_test(a: &[f64], b: &[f64], variance: VarianceAssumption) -> Result<TTestResult> {
    let (na, nb) = (a.len(), b.len());
    let (mean_a, var_a) = match (mean(a), sample_variance(a)) {
        (Some(m), Some(v)) => (m, v),
        _ => return Err(SimError::InsufficientCohortSize { cohort: TreatmentKind::Physiotherapy, size: na, required: MIN_COHORT_SIZE }),
    };
    let (mean_b, var_b) = match (mean(b), sample_variance(b)) {
        (Some(m), Some(v)) => (m, v),
        _ => return Err(SimError::InsufficientCohortSize { cohort: TreatmentKind::AntiInflammatory, size: nb, required: MIN_COHORT_SIZE }),
    };
    let (na, nb) = (na as f64, nb as f64);

    let (se, df) = match variance {
        VarianceAssumption::Pooled => {
            let df = na + nb - 2.0;
            let pooled = ((na - 1.0) * var_a + (nb - 1.0) * var_b) / df;
            ((pooled * (1.0 / na + 1.0 / nb)).sqrt(), df)
        }
        VarianceAssumption::Welch => {
            let qa = var_a / na;
            let qb = var_b / nb;
            let df = (qa + qb).powi(2) / (qa * qa / (na - 1.0) + qb * qb / (nb - 1.0));
            ((qa + qb).sqrt(), df)
        }
    };

    if !(se > 0.0) || !se.is_finite() || !df.is_finite() {
        return Err(SimError::DegenerateVariance { mean_a, mean_b });
    }

    let diff = mean_a - mean_b;
    let statistic = diff / se;
    let dist = StudentsT::new(0.0, 1.0, df).map_err(|e| SimError::Distribution(e.to_string()))?;
    let p_value = (2.0 * dist.sf(statistic.abs())).min(1.0);

    Ok(TTestResult { statistic, p_value, degrees_of_freedom: df, mean_difference: diff, variance })
}

/// Compare the physiotherapy cohort against the anti-inflammatory cohort
pub fn compare_cohorts(
    records: &[PatientRecord],
    outcome: Outcome,
    variance: VarianceAssumption,
) -> Result<CohortComparison> {
    let cohorts = Cohorts::partition(records);
    for kind in TreatmentKind::ALL {
        let size = cohorts.get(kind).len();
        if size < MIN_COHORT_SIZE {
            return Err(SimError::InsufficientCohortSize { cohort: kind, size, required: MIN_COHORT_SIZE });
        }
    }

    let physio = cohorts.values(TreatmentKind::Physiotherapy, outcome);
    let nsaid = cohorts.values(TreatmentKind::AntiInflammatory, outcome);
    let test = two_sample_t_test(&physio, &nsaid, variance)?;

    tracing::info!(
        %outcome,
        %variance,
        statistic = test.statistic,
        p_value = test.p_value,
        "cohort comparison"
    );

    Ok(CohortComparison {
        outcome,
        physiotherapy: cohorts.summary(TreatmentKind::Physiotherapy, outcome),
        anti_inflammatory: cohorts.summary(TreatmentKind::AntiInflammatory, outcome),
        test,
    })
}
