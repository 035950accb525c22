//! In-process scheduling coordination and retry of failed completions.

use tracing::{info, warn};

use super::{AppointmentScheduler, OpsError, OpsResult};
use crate::clock::Clock;
use crate::config::CoordinationConfig;
use crate::models::AppointmentStatus;
use crate::ports::{
    CoordinationError, CoordinationFailureLog, CoordinationFailureStatus,
    SchedulingServiceCoordinator,
};

/// Completes appointments through a scheduler living in the same process.
///
/// Completing an appointment that is already completed succeeds, so a retried
/// call after a lost acknowledgement is harmless.
pub struct LocalSchedulingCoordinator<'a> {
    scheduler: &'a AppointmentScheduler<'a>,
}

impl<'a> LocalSchedulingCoordinator<'a> {
    pub fn new(scheduler: &'a AppointmentScheduler<'a>) -> Self {
        Self { scheduler }
    }
}

impl SchedulingServiceCoordinator for LocalSchedulingCoordinator<'_> {
    fn complete_appointment(
        &self,
        appointment_id: &str,
        by_user_id: &str,
    ) -> Result<(), CoordinationError> {
        match self.scheduler.get(appointment_id) {
            Ok(appointment) if appointment.status == AppointmentStatus::Completed => {
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => return Err(to_coordination_error(e)),
        }
        self.scheduler
            .complete(appointment_id, Some(by_user_id))
            .map(|_| ())
            .map_err(to_coordination_error)
    }
}

fn to_coordination_error(e: OpsError) -> CoordinationError {
    match e {
        OpsError::Port(_) | OpsError::ConcurrentModification { .. } => {
            CoordinationError::Unavailable(e.to_string())
        }
        other => CoordinationError::Rejected(other.to_string()),
    }
}

/// Counters from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub attempted: u32,
    pub resolved: u32,
    pub abandoned: u32,
    pub still_pending: u32,
}

/// Retries appointment completions that failed after a consultation closed.
pub struct CoordinationReconciler<'a> {
    coordinator: &'a dyn SchedulingServiceCoordinator,
    failures: &'a dyn CoordinationFailureLog,
    clock: &'a dyn Clock,
    config: &'a CoordinationConfig,
}

impl<'a> CoordinationReconciler<'a> {
    pub fn new(
        coordinator: &'a dyn SchedulingServiceCoordinator,
        failures: &'a dyn CoordinationFailureLog,
        clock: &'a dyn Clock,
        config: &'a CoordinationConfig,
    ) -> Self {
        Self {
            coordinator,
            failures,
            clock,
            config,
        }
    }

    /// Retry one batch of pending failures.
    ///
    /// A record is abandoned once `max_attempts` calls (the original one
    /// included) have failed.
    pub fn retry_pending(&self) -> OpsResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for mut record in self
            .failures
            .pending_coordination_failures(self.config.retry_batch_size)?
        {
            report.attempted += 1;
            record.attempts += 1;
            record.last_attempt_at = self.clock.now();

            match self
                .coordinator
                .complete_appointment(&record.appointment_id, &record.closed_by_user_id)
            {
                Ok(()) => {
                    record.status = CoordinationFailureStatus::Resolved;
                    report.resolved += 1;
                    info!(
                        failure_id = %record.failure_id,
                        appointment_id = %record.appointment_id,
                        attempts = record.attempts,
                        "coordination failure resolved"
                    );
                }
                Err(e) => {
                    record.last_error = e.to_string();
                    if record.attempts >= self.config.max_attempts {
                        record.status = CoordinationFailureStatus::Abandoned;
                        report.abandoned += 1;
                        warn!(
                            failure_id = %record.failure_id,
                            appointment_id = %record.appointment_id,
                            attempts = record.attempts,
                            error = %e,
                            "coordination failure abandoned"
                        );
                    } else {
                        report.still_pending += 1;
                    }
                }
            }
            self.failures.update_coordination_failure(&record)?;
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                resolved = report.resolved,
                abandoned = report.abandoned,
                still_pending = report.still_pending,
                "reconciliation pass finished"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PortError;

    #[test]
    fn test_storage_trouble_is_retryable() {
        let busy = to_coordination_error(OpsError::Port(PortError::Backend("locked".into())));
        assert!(matches!(busy, CoordinationError::Unavailable(_)));

        let raced = to_coordination_error(OpsError::ConcurrentModification {
            kind: "appointment",
            id: "appt-1".into(),
        });
        assert!(matches!(raced, CoordinationError::Unavailable(_)));
    }

    #[test]
    fn test_domain_refusal_is_rejected() {
        let refused = to_coordination_error(OpsError::InvalidTransition {
            aggregate: "appointment",
            action: "complete",
            state: "cancelled".into(),
        });
        assert!(matches!(refused, CoordinationError::Rejected(_)));
    }
}
