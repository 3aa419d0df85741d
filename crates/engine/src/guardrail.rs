// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! GPU-memory guardrail (§4.3, invariant G1).

use loader_adapters::AcceleratorProbe;
use loader_core::VramSample;

use crate::error::SupervisorError;

/// Outcome of a single guardrail check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuardrailCheck {
    pub sample: VramSample,
    pub floor_mb: u32,
}

impl GuardrailCheck {
    pub fn passed(&self) -> bool {
        self.sample.free_mb >= self.floor_mb
    }
}

/// Query the probe and evaluate it against `floor_mb`. A probe failure is
/// folded into a zero-free-memory sample (§4.3 "Measurement") rather than
/// propagated, since the guardrail must fail closed.
pub async fn check(
    probe: &dyn AcceleratorProbe,
    floor_mb: u32,
    timestamp_ms: u64,
) -> GuardrailCheck {
    let sample = match probe.sample(timestamp_ms).await {
        Ok(sample) => sample,
        Err(err) => {
            tracing::warn!(error = %err, "accelerator probe failed; treating as 0 MiB free");
            VramSample { timestamp_ms, used_mb: 0, free_mb: 0, total_mb: 0, percent: 0.0 }
        }
    };
    GuardrailCheck { sample, floor_mb }
}

/// Evaluate the guardrail and return an error if it trips, matching the
/// `STARTING → IDLE` gate in §4.3.
pub async fn enforce(
    probe: &dyn AcceleratorProbe,
    floor_mb: u32,
    timestamp_ms: u64,
) -> Result<GuardrailCheck, SupervisorError> {
    let outcome = check(probe, floor_mb, timestamp_ms).await;
    if outcome.passed() {
        Ok(outcome)
    } else {
        Err(SupervisorError::VramGuardrailTripped { free_mb: outcome.sample.free_mb, floor_mb })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loader_adapters::FakeProbe;

    #[tokio::test]
    async fn passes_when_free_memory_is_above_the_floor() {
        let sample = VramSample { timestamp_ms: 0, used_mb: 1000, free_mb: 10_000, total_mb: 11_000, percent: 9.0 };
        let probe = FakeProbe::constant(sample);
        let outcome = enforce(&probe, 8000, 0).await.expect("should pass");
        assert!(outcome.passed());
    }

    #[tokio::test]
    async fn trips_when_free_memory_is_below_the_floor() {
        let sample = VramSample { timestamp_ms: 0, used_mb: 5000, free_mb: 2000, total_mb: 7000, percent: 71.0 };
        let probe = FakeProbe::constant(sample);
        let err = enforce(&probe, 8000, 0).await.unwrap_err();
        assert!(matches!(err, SupervisorError::VramGuardrailTripped { free_mb: 2000, floor_mb: 8000 }));
    }

    #[tokio::test]
    async fn probe_failure_is_treated_as_zero_free_and_trips() {
        let probe = FakeProbe::new(vec![]);
        let err = enforce(&probe, 8000, 0).await.unwrap_err();
        assert!(matches!(err, SupervisorError::VramGuardrailTripped { free_mb: 0, .. }));
    }
}
