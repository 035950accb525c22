//! Temporal, role-scoped access eligibility and membership administration.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{flush_events, on_constraint, OpsError, OpsResult};
use crate::clock::Clock;
use crate::models::{ClinicMembership, ClinicRole, EngagementKind, ValidityWindow};
use crate::ports::{
    EventPublisher, MembershipDirectory, MembershipEligibilityChecker, MembershipStore,
    PortResult,
};

/// Evaluates eligibility against the currently stored membership rows.
///
/// There is no historical reconstruction: a role change applies to every
/// instant asked about afterwards.
pub struct EligibilityResolver<'a> {
    directory: &'a dyn MembershipDirectory,
}

impl<'a> EligibilityResolver<'a> {
    pub fn new(directory: &'a dyn MembershipDirectory) -> Self {
        Self { directory }
    }

    /// True iff the user has a membership in the clinic that is active,
    /// covers `at`, and carries one of `allowed_roles`.
    pub fn is_eligible(
        &self,
        user_id: &str,
        clinic_id: &str,
        at: DateTime<Utc>,
        allowed_roles: &[ClinicRole],
    ) -> OpsResult<bool> {
        Ok(self.is_user_eligible_for_clinic_at(user_id, clinic_id, at, allowed_roles)?)
    }

    /// Distinct users of the clinic satisfying the same predicate, sorted.
    pub fn list_eligible_practitioners(
        &self,
        clinic_id: &str,
        at: DateTime<Utc>,
        allowed_roles: &[ClinicRole],
    ) -> OpsResult<Vec<String>> {
        Ok(self.list_eligible_practitioner_users_for_clinic(clinic_id, at, allowed_roles)?)
    }
}

impl MembershipEligibilityChecker for EligibilityResolver<'_> {
    fn is_user_eligible_for_clinic_at(
        &self,
        user_id: &str,
        clinic_id: &str,
        at: DateTime<Utc>,
        allowed_roles: &[ClinicRole],
    ) -> PortResult<bool> {
        let eligible = self
            .directory
            .find_membership(clinic_id, user_id)?
            .map_or(false, |membership| membership.is_eligible_at(at, allowed_roles));
        debug!(user_id, clinic_id, at = %at, eligible, "eligibility evaluated");
        Ok(eligible)
    }

    fn list_eligible_practitioner_users_for_clinic(
        &self,
        clinic_id: &str,
        at: DateTime<Utc>,
        allowed_roles: &[ClinicRole],
    ) -> PortResult<Vec<String>> {
        let users: BTreeSet<String> = self
            .directory
            .memberships_for_clinic(clinic_id)?
            .into_iter()
            .filter(|membership| membership.is_eligible_at(at, allowed_roles))
            .map(|membership| membership.user_id)
            .collect();
        Ok(users.into_iter().collect())
    }
}

/// Membership grant request.
#[derive(Debug, Clone)]
pub struct GrantMembership {
    pub clinic_id: String,
    pub user_id: String,
    pub role: ClinicRole,
    pub engagement: EngagementKind,
    pub validity: ValidityWindow,
}

/// Grants and mutates memberships. Memberships are never deleted.
pub struct MembershipRegistry<'a> {
    store: &'a dyn MembershipStore,
    events: &'a dyn EventPublisher,
    clock: &'a dyn Clock,
}

impl<'a> MembershipRegistry<'a> {
    pub fn new(
        store: &'a dyn MembershipStore,
        events: &'a dyn EventPublisher,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            store,
            events,
            clock,
        }
    }

    pub fn grant(&self, request: GrantMembership) -> OpsResult<ClinicMembership> {
        let mut membership = ClinicMembership::grant(
            request.clinic_id,
            request.user_id,
            request.role,
            request.engagement,
            request.validity,
            self.clock.now(),
        );

        self.store.insert_membership(&membership).map_err(|e| {
            on_constraint(e, || {
                warn!(
                    clinic_id = %membership.clinic_id,
                    user_id = %membership.user_id,
                    "membership already granted"
                );
                OpsError::AlreadyExists {
                    kind: "membership",
                    id: format!("{}/{}", membership.clinic_id, membership.user_id),
                }
            })
        })?;
        let _ = flush_events(self.events, &mut membership);

        info!(
            membership_id = %membership.membership_id,
            clinic_id = %membership.clinic_id,
            user_id = %membership.user_id,
            role = %membership.role,
            "membership granted"
        );
        Ok(membership)
    }

    pub fn change_role(&self, membership_id: &str, role: ClinicRole) -> OpsResult<ClinicMembership> {
        let now = self.clock.now();
        self.mutate(membership_id, |membership| {
            membership.change_role(role, now);
            Ok(())
        })
    }

    pub fn change_engagement(
        &self,
        membership_id: &str,
        engagement: EngagementKind,
    ) -> OpsResult<ClinicMembership> {
        let now = self.clock.now();
        self.mutate(membership_id, |membership| {
            membership.change_engagement(engagement, now);
            Ok(())
        })
    }

    pub fn change_validity(
        &self,
        membership_id: &str,
        validity: ValidityWindow,
    ) -> OpsResult<ClinicMembership> {
        let now = self.clock.now();
        self.mutate(membership_id, |membership| {
            membership.change_validity(validity, now);
            Ok(())
        })
    }

    pub fn disable(&self, membership_id: &str) -> OpsResult<ClinicMembership> {
        let now = self.clock.now();
        self.mutate(membership_id, |membership| Ok(membership.disable(now)?))
    }

    pub fn enable(&self, membership_id: &str) -> OpsResult<ClinicMembership> {
        let now = self.clock.now();
        self.mutate(membership_id, |membership| Ok(membership.enable(now)?))
    }

    fn mutate<F>(&self, membership_id: &str, change: F) -> OpsResult<ClinicMembership>
    where
        F: FnOnce(&mut ClinicMembership) -> OpsResult<()>,
    {
        let mut membership = self
            .store
            .get_membership(membership_id)?
            .ok_or_else(|| OpsError::NotFound {
                kind: "membership",
                id: membership_id.to_string(),
            })?;

        change(&mut membership)?;
        let events = membership.pending_events.len();
        if events == 0 {
            return Ok(membership);
        }

        self.store.update_membership(&membership)?;
        membership.version += 1;
        let _ = flush_events(self.events, &mut membership);

        info!(membership_id, events, "membership updated");
        Ok(membership)
    }
}
