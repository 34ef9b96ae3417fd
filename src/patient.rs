//! Patient clinical state and the treatment / deterioration update rules.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::SimError;

// === CONSTANTS ===

pub const INITIAL_PAIN_RANGE: (f64, f64) = (5.0, 8.0);
pub const INITIAL_MOBILITY_RANGE: (f64, f64) = (20.0, 40.0);
pub const INITIAL_ADHERENCE: f64 = 1.0;
/// SF-36 style score, not moved by any rule yet
pub const INITIAL_QUALITY_OF_LIFE: f64 = 50.0;
pub const FALLBACK_PROBABILITY: f64 = 0.10;

// === TREATMENT KIND ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TreatmentKind {
    Physiotherapy,
    AntiInflammatory,
}

impl TreatmentKind {
    pub const ALL: [TreatmentKind; 2] = [TreatmentKind::Physiotherapy, TreatmentKind::AntiInflammatory];

    /// Default assignment used when seeding a population: even ids get physiotherapy
    pub fn for_patient_id(id: usize) -> Self {
        if id % 2 == 0 { TreatmentKind::Physiotherapy } else { TreatmentKind::AntiInflammatory }
    }

    /// Day-of-week alternation from the flat day loop; `index` counts from 0
    pub fn for_weekday(index: u32) -> Self {
        if index % 7 == 0 { TreatmentKind::Physiotherapy } else { TreatmentKind::AntiInflammatory }
    }

    /// (pain reduction range, mobility gain range) per session
    pub fn response_ranges(self) -> ((f64, f64), (f64, f64)) {
        match self {
            TreatmentKind::Physiotherapy => ((0.2, 0.5), (1.0, 2.0)),
            TreatmentKind::AntiInflammatory => ((0.3, 0.6), (0.5, 1.5)),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TreatmentKind::Physiotherapy => "physiotherapy",
            TreatmentKind::AntiInflammatory => "anti-inflammatory",
        }
    }
}

impl fmt::Display for TreatmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TreatmentKind {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "physiotherapy" | "physio" => Ok(TreatmentKind::Physiotherapy),
            "anti-inflammatory" | "anti_inflammatory" | "nsaid" => Ok(TreatmentKind::AntiInflammatory),
            _ => Err(SimError::InvalidTreatmentKind(s.to_string())),
        }
    }
}

// === PATIENT ===

/// Static covariates. Stored for reporting; no update rule reads them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Covariates {
    pub age: f64,
    pub bmi: f64,
    /// Ordinal 1-5
    pub severity: u8,
}

impl Default for Covariates {
    fn default() -> Self {
        Covariates { age: 45.0, bmi: 32.0, severity: 3 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Patient {
    id: usize,
    covariates: Covariates,
    pain_level: f64,
    mobility_score: f64,
    treatment_adherence: f64,
    fallback: bool,
    quality_of_life: f64,
}

/// Read-only projection used for reporting
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PatientSnapshot {
    pub patient_id: usize,
    pub pain_level: f64,
    pub mobility_score: f64,
    pub fallback: bool,
    pub quality_of_life: f64,
}

impl Patient {
    /// Create a patient with pain ~ U[5,8] and mobility ~ U[20,40].
    /// Pain is drawn before mobility.
    pub fn create<R: Rng + ?Sized>(id: usize, covariates: Covariates, rng: &mut R) -> Self {
        let pain_level = rng.gen_range(INITIAL_PAIN_RANGE.0..=INITIAL_PAIN_RANGE.1);
        let mobility_score = rng.gen_range(INITIAL_MOBILITY_RANGE.0..=INITIAL_MOBILITY_RANGE.1);
        Self::with_initial_state(id, covariates, pain_level, mobility_score)
    }

    /// Create a patient with a known starting state. Negative pain is floored at 0.
    pub fn with_initial_state(id: usize, covariates: Covariates, pain_level: f64, mobility_score: f64) -> Self {
        Patient {
            id,
            covariates,
            pain_level: pain_level.max(0.0),
            mobility_score,
            treatment_adherence: INITIAL_ADHERENCE,
            fallback: false,
            quality_of_life: INITIAL_QUALITY_OF_LIFE,
        }
    }

    /// Apply one treatment session. Pain is clamped at 0 afterwards;
    /// mobility has no ceiling.
    pub fn apply_treatment<R: Rng + ?Sized>(&mut self, kind: TreatmentKind, rng: &mut R) {
        let ((pain_lo, pain_hi), (mob_lo, mob_hi)) = kind.response_ranges();
        self.pain_level -= rng.gen_range(pain_lo..=pain_hi);
        self.mobility_score += rng.gen_range(mob_lo..=mob_hi);
        self.pain_level = self.pain_level.max(0.0);
    }

    /// Bernoulli(0.10) draw; a hit latches `fallback` for good.
    /// Returns the flag after the draw.
    pub fn simulate_fallback<R: Rng + ?Sized>(&mut self, rng: &mut R) -> bool {
        if rng.gen_bool(FALLBACK_PROBABILITY) {
            self.fallback = true;
        }
        self.fallback
    }

    pub fn snapshot(&self) -> PatientSnapshot {
        PatientSnapshot {
            patient_id: self.id,
            pain_level: self.pain_level,
            mobility_score: self.mobility_score,
            fallback: self.fallback,
            quality_of_life: self.quality_of_life,
        }
    }

    pub fn id(&self) -> usize { self.id }
    pub fn covariates(&self) -> &Covariates { &self.covariates }
    pub fn pain_level(&self) -> f64 { self.pain_level }
    pub fn mobility_score(&self) -> f64 { self.mobility_score }
    pub fn treatment_adherence(&self) -> f64 { self.treatment_adherence }
    pub fn fallback(&self) -> bool { self.fallback }
    pub fn quality_of_life(&self) -> f64 { self.quality_of_life }
}
