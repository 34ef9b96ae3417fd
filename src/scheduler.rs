//! Per-patient periodic treatment delivery.
//!
//! A scheduler with cadence N fires at simulated days N, 2N, 3N, ... and never
//! at day 0. One firing applies the treatment and then rolls the fallback draw.

use rand::Rng;
use serde::Serialize;

use crate::patient::{Patient, TreatmentKind};
use crate::{Result, SimError};

/// Immutable pairing of a patient with a treatment kind and cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TreatmentAssignment {
    pub patient_id: usize,
    pub kind: TreatmentKind,
    pub cadence_days: u32,
}

impl TreatmentAssignment {
    pub fn new(patient_id: usize, kind: TreatmentKind, cadence_days: u32) -> Result<Self> {
        if cadence_days == 0 {
            return Err(SimError::InvalidCadence(cadence_days));
        }
        Ok(TreatmentAssignment { patient_id, kind, cadence_days })
    }
}

/// One delivered treatment session
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TreatmentEvent {
    pub day: u32,
    pub patient_id: usize,
    pub kind: TreatmentKind,
    /// Fallback flag after the session's draw
    pub fallback: bool,
}

#[derive(Debug, Clone)]
pub struct TreatmentScheduler {
    assignment: TreatmentAssignment,
    step: u32,
    next_due: u32,
    firings: u32,
}

impl TreatmentScheduler {
    pub fn new(assignment: TreatmentAssignment) -> Self {
        let step = assignment.cadence_days;
        TreatmentScheduler { assignment, step, next_due: step, firings: 0 }
    }

    /// Deliver every day regardless of the assigned cadence (weekday alternation)
    pub fn daily(assignment: TreatmentAssignment) -> Self {
        TreatmentScheduler { assignment, step: 1, next_due: 1, firings: 0 }
    }

    pub fn assignment(&self) -> &TreatmentAssignment { &self.assignment }
    pub fn next_due(&self) -> u32 { self.next_due }
    pub fn firings(&self) -> u32 { self.firings }

    pub fn is_due(&self, day: u32) -> bool {
        day == self.next_due
    }

    /// Fire with the assigned treatment kind
    pub fn fire<R: Rng + ?Sized>(&mut self, day: u32, patient: &mut Patient, rng: &mut R) -> TreatmentEvent {
        self.fire_with(self.assignment.kind, day, patient, rng)
    }

    /// Fire with an explicit kind. Treatment always precedes the fallback draw.
    pub fn fire_with<R: Rng + ?Sized>(
        &mut self,
        kind: TreatmentKind,
        day: u32,
        patient: &mut Patient,
        rng: &mut R,
    ) -> TreatmentEvent {
        patient.apply_treatment(kind, rng);
        let fallback = patient.simulate_fallback(rng);
        self.firings += 1;
        self.next_due = day.saturating_add(self.step);

        tracing::debug!(day, patient = patient.id(), %kind, fallback, "treatment delivered");

        TreatmentEvent { day, patient_id: patient.id(), kind, fallback }
    }

    /// Drive a single patient on its own until `horizon_days` (inclusive)
    pub fn run_until<R: Rng + ?Sized>(
        &mut self,
        patient: &mut Patient,
        horizon_days: u32,
        rng: &mut R,
    ) -> Vec<TreatmentEvent> {
        let mut events = Vec::new();
        while self.next_due <= horizon_days {
            let day = self.next_due;
            events.push(self.fire(day, patient, rng));
            // saturated at u32::MAX
            if self.next_due == day { break; }
        }
        events
    }
}
