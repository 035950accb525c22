//! Clinic membership models: who belongs to a clinic, in which role, and when.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{new_id, Aggregate, DomainError, DomainEvent, DomainResult};

/// Clinical role held within a clinic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ClinicRole {
    Veterinarian,
    VeterinaryTechnician,
    Assistant,
    Receptionist,
    ClinicManager,
}

impl ClinicRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClinicRole::Veterinarian => "veterinarian",
            ClinicRole::VeterinaryTechnician => "veterinary_technician",
            ClinicRole::Assistant => "assistant",
            ClinicRole::Receptionist => "receptionist",
            ClinicRole::ClinicManager => "clinic_manager",
        }
    }
}

impl FromStr for ClinicRole {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "veterinarian" => Ok(ClinicRole::Veterinarian),
            "veterinary_technician" => Ok(ClinicRole::VeterinaryTechnician),
            "assistant" => Ok(ClinicRole::Assistant),
            "receptionist" => Ok(ClinicRole::Receptionist),
            "clinic_manager" => Ok(ClinicRole::ClinicManager),
            _ => Err(DomainError::InvalidInput(format!("Unknown clinic role: {}", s))),
        }
    }
}

impl fmt::Display for ClinicRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the member is engaged by the clinic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngagementKind {
    Employee,
    Contractor,
}

impl EngagementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementKind::Employee => "employee",
            EngagementKind::Contractor => "contractor",
        }
    }
}

impl FromStr for EngagementKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "employee" => Ok(EngagementKind::Employee),
            "contractor" => Ok(EngagementKind::Contractor),
            _ => Err(DomainError::InvalidInput(format!("Unknown engagement kind: {}", s))),
        }
    }
}

/// Membership status. Disabling is the soft delete.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Active,
    Disabled,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Active => "active",
            MembershipStatus::Disabled => "disabled",
        }
    }
}

impl FromStr for MembershipStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(MembershipStatus::Active),
            "disabled" => Ok(MembershipStatus::Disabled),
            _ => Err(DomainError::InvalidInput(format!("Unknown membership status: {}", s))),
        }
    }
}

/// Closed temporal validity window `[valid_from, valid_until]`.
///
/// An absent `valid_until` means open-ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidityWindow {
    valid_from: DateTime<Utc>,
    valid_until: Option<DateTime<Utc>>,
}

impl ValidityWindow {
    /// Build a window, rejecting `valid_until < valid_from`.
    pub fn new(
        valid_from: DateTime<Utc>,
        valid_until: Option<DateTime<Utc>>,
    ) -> DomainResult<Self> {
        if let Some(until) = valid_until {
            if until < valid_from {
                return Err(DomainError::InvalidInput(format!(
                    "validity window ends ({}) before it starts ({})",
                    until.to_rfc3339(),
                    valid_from.to_rfc3339()
                )));
            }
        }
        Ok(Self {
            valid_from,
            valid_until,
        })
    }

    /// Open-ended window starting at `valid_from`.
    pub fn starting(valid_from: DateTime<Utc>) -> Self {
        Self {
            valid_from,
            valid_until: None,
        }
    }

    pub fn valid_from(&self) -> DateTime<Utc> {
        self.valid_from
    }

    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        self.valid_until
    }

    /// Both bounds are inclusive.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && self.valid_until.map_or(true, |until| at <= until)
    }
}

/// A user's membership in a clinic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClinicMembership {
    pub membership_id: String,
    pub clinic_id: String,
    pub user_id: String,
    pub role: ClinicRole,
    pub engagement: EngagementKind,
    pub status: MembershipStatus,
    pub validity: ValidityWindow,
    pub created_at: DateTime<Utc>,
    /// Optimistic-concurrency version
    pub version: i64,
    #[serde(skip)]
    pub(crate) pending_events: Vec<DomainEvent>,
}

impl ClinicMembership {
    /// Grant a new, active membership.
    pub fn grant(
        clinic_id: String,
        user_id: String,
        role: ClinicRole,
        engagement: EngagementKind,
        validity: ValidityWindow,
        now: DateTime<Utc>,
    ) -> Self {
        let mut membership = Self {
            membership_id: new_id(),
            clinic_id,
            user_id,
            role,
            engagement,
            status: MembershipStatus::Active,
            validity,
            created_at: now,
            version: 0,
            pending_events: Vec::new(),
        };
        membership.pending_events.push(DomainEvent::MembershipGranted {
            membership_id: membership.membership_id.clone(),
            clinic_id: membership.clinic_id.clone(),
            user_id: membership.user_id.clone(),
            role,
            engagement,
            occurred_at: now,
        });
        membership
    }

    /// Active and inside the validity window at `at`.
    pub fn is_effective_at(&self, at: DateTime<Utc>) -> bool {
        self.status == MembershipStatus::Active && self.validity.contains(at)
    }

    /// Effective at `at` with a role among `allowed_roles`.
    pub fn is_eligible_at(&self, at: DateTime<Utc>, allowed_roles: &[ClinicRole]) -> bool {
        self.is_effective_at(at) && allowed_roles.contains(&self.role)
    }

    pub fn change_role(&mut self, role: ClinicRole, now: DateTime<Utc>) {
        if self.role == role {
            return;
        }
        self.role = role;
        self.pending_events.push(DomainEvent::MembershipRoleChanged {
            membership_id: self.membership_id.clone(),
            clinic_id: self.clinic_id.clone(),
            role,
            occurred_at: now,
        });
    }

    pub fn change_engagement(&mut self, engagement: EngagementKind, now: DateTime<Utc>) {
        if self.engagement == engagement {
            return;
        }
        self.engagement = engagement;
        self.pending_events.push(DomainEvent::MembershipEngagementChanged {
            membership_id: self.membership_id.clone(),
            clinic_id: self.clinic_id.clone(),
            engagement,
            occurred_at: now,
        });
    }

    pub fn change_validity(&mut self, validity: ValidityWindow, now: DateTime<Utc>) {
        if self.validity == validity {
            return;
        }
        self.validity = validity;
        self.pending_events.push(DomainEvent::MembershipValidityChanged {
            membership_id: self.membership_id.clone(),
            clinic_id: self.clinic_id.clone(),
            valid_from: validity.valid_from(),
            valid_until: validity.valid_until(),
            occurred_at: now,
        });
    }

    pub fn disable(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status == MembershipStatus::Disabled {
            return Err(self.invalid("disable"));
        }
        self.status = MembershipStatus::Disabled;
        self.pending_events.push(DomainEvent::MembershipDisabled {
            membership_id: self.membership_id.clone(),
            clinic_id: self.clinic_id.clone(),
            occurred_at: now,
        });
        Ok(())
    }

    pub fn enable(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status == MembershipStatus::Active {
            return Err(self.invalid("enable"));
        }
        self.status = MembershipStatus::Active;
        self.pending_events.push(DomainEvent::MembershipEnabled {
            membership_id: self.membership_id.clone(),
            clinic_id: self.clinic_id.clone(),
            occurred_at: now,
        });
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> DomainError {
        DomainError::InvalidTransition {
            aggregate: Self::KIND,
            action,
            state: self.status.as_str().to_string(),
        }
    }
}

impl Aggregate for ClinicMembership {
    const KIND: &'static str = "membership";

    fn id(&self) -> &str {
        &self.membership_id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn pending_events(&self) -> &[DomainEvent] {
        &self.pending_events
    }

    fn take_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.pending_events)
    }

    fn restore_events(&mut self, mut events: Vec<DomainEvent>) {
        events.append(&mut self.pending_events);
        self.pending_events = events;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn first_half_of_2024() -> ClinicMembership {
        let validity = ValidityWindow::new(day(2024, 1, 1), Some(day(2024, 6, 30))).unwrap();
        ClinicMembership::grant(
            "clinic-1".into(),
            "user-1".into(),
            ClinicRole::Veterinarian,
            EngagementKind::Employee,
            validity,
            day(2023, 12, 1),
        )
    }

    #[test]
    fn test_window_rejects_inverted_bounds() {
        let result = ValidityWindow::new(day(2024, 6, 30), Some(day(2024, 1, 1)));
        assert!(matches!(result, Err(DomainError::InvalidInput(_))));

        // Zero-length window is allowed
        assert!(ValidityWindow::new(day(2024, 1, 1), Some(day(2024, 1, 1))).is_ok());
    }

    #[test]
    fn test_effective_inside_window() {
        let membership = first_half_of_2024();
        assert!(membership.is_effective_at(Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()));
        assert!(!membership.is_effective_at(day(2024, 7, 1)));
        assert!(!membership.is_effective_at(day(2023, 12, 31)));
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let membership = first_half_of_2024();
        assert!(membership.is_effective_at(day(2024, 1, 1)));
        assert!(membership.is_effective_at(day(2024, 6, 30)));
    }

    #[test]
    fn test_open_ended_window() {
        let window = ValidityWindow::starting(day(2024, 1, 1));
        assert!(window.contains(day(2099, 1, 1)));
        assert!(!window.contains(day(2023, 12, 31)));
    }

    #[test]
    fn test_disabled_membership_is_not_effective() {
        let mut membership = first_half_of_2024();
        membership.disable(day(2024, 2, 1)).unwrap();
        assert!(!membership.is_effective_at(day(2024, 3, 15)));

        assert!(matches!(
            membership.disable(day(2024, 2, 2)),
            Err(DomainError::InvalidTransition { .. })
        ));

        membership.enable(day(2024, 2, 3)).unwrap();
        assert!(membership.is_effective_at(day(2024, 3, 15)));
    }

    #[test]
    fn test_role_filter() {
        let mut membership = first_half_of_2024();
        let at = day(2024, 3, 15);
        assert!(membership.is_eligible_at(at, &[ClinicRole::Veterinarian]));
        assert!(!membership.is_eligible_at(at, &[ClinicRole::Receptionist]));

        membership.change_role(ClinicRole::Receptionist, at);
        assert!(membership.is_eligible_at(at, &[ClinicRole::Receptionist]));
    }

    #[test]
    fn test_events_buffered_until_taken() {
        let mut membership = first_half_of_2024();
        membership.change_role(ClinicRole::Veterinarian, day(2024, 1, 2)); // unchanged, no event
        membership.change_engagement(EngagementKind::Contractor, day(2024, 1, 2));

        let events = membership.take_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name(), "membership_granted");
        assert_eq!(events[1].name(), "membership_engagement_changed");
        assert!(membership.take_events().is_empty());
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!(
            "veterinary_technician".parse::<ClinicRole>().unwrap(),
            ClinicRole::VeterinaryTechnician
        );
        assert!("surgeon".parse::<ClinicRole>().is_err());
    }
}
