//! Membership database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{check_cas, from_sql_ts, from_sql_ts_opt, parse_column, to_sql_ts, Database, DbError, DbResult};
use crate::models::{ClinicMembership, ValidityWindow};
use crate::ports::{MembershipDirectory, MembershipStore, PortResult};

const SELECT_MEMBERSHIP: &str = r#"
    SELECT membership_id, clinic_id, user_id, role, engagement, status,
           valid_from, valid_until, created_at, version
    FROM memberships
"#;

impl Database {
    pub fn insert_membership_row(&self, membership: &ClinicMembership) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO memberships (
                membership_id, clinic_id, user_id, role, engagement, status,
                valid_from, valid_until, created_at, version
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                membership.membership_id,
                membership.clinic_id,
                membership.user_id,
                membership.role.as_str(),
                membership.engagement.as_str(),
                membership.status.as_str(),
                to_sql_ts(membership.validity.valid_from()),
                membership.validity.valid_until().map(to_sql_ts),
                to_sql_ts(membership.created_at),
                membership.version,
            ],
        )?;
        Ok(())
    }

    /// Compare-and-swap update; returns the number of rows changed.
    pub fn update_membership_row(&self, membership: &ClinicMembership) -> DbResult<usize> {
        Ok(self.conn.execute(
            r#"
            UPDATE memberships SET
                role = ?3,
                engagement = ?4,
                status = ?5,
                valid_from = ?6,
                valid_until = ?7,
                version = version + 1
            WHERE membership_id = ?1 AND version = ?2
            "#,
            params![
                membership.membership_id,
                membership.version,
                membership.role.as_str(),
                membership.engagement.as_str(),
                membership.status.as_str(),
                to_sql_ts(membership.validity.valid_from()),
                membership.validity.valid_until().map(to_sql_ts),
            ],
        )?)
    }

    pub fn get_membership_row(&self, membership_id: &str) -> DbResult<Option<ClinicMembership>> {
        self.conn
            .query_row(
                &format!("{} WHERE membership_id = ?", SELECT_MEMBERSHIP),
                [membership_id],
                MembershipRow::from_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    pub fn find_membership_row(
        &self,
        clinic_id: &str,
        user_id: &str,
    ) -> DbResult<Option<ClinicMembership>> {
        self.conn
            .query_row(
                &format!("{} WHERE clinic_id = ?1 AND user_id = ?2", SELECT_MEMBERSHIP),
                [clinic_id, user_id],
                MembershipRow::from_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// All memberships of a clinic, oldest first.
    pub fn list_memberships_for_clinic(&self, clinic_id: &str) -> DbResult<Vec<ClinicMembership>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE clinic_id = ? ORDER BY created_at, membership_id",
            SELECT_MEMBERSHIP
        ))?;
        let rows = stmt.query_map([clinic_id], MembershipRow::from_row)?;

        let mut memberships = Vec::new();
        for row in rows {
            memberships.push(row?.try_into()?);
        }
        Ok(memberships)
    }
}

impl MembershipStore for Database {
    fn get_membership(&self, membership_id: &str) -> PortResult<Option<ClinicMembership>> {
        Ok(self.get_membership_row(membership_id)?)
    }

    fn insert_membership(&self, membership: &ClinicMembership) -> PortResult<()> {
        Ok(self.insert_membership_row(membership)?)
    }

    fn update_membership(&self, membership: &ClinicMembership) -> PortResult<()> {
        let rows = self.update_membership_row(membership)?;
        check_cas(rows, "membership", &membership.membership_id)
    }
}

impl MembershipDirectory for Database {
    fn find_membership(
        &self,
        clinic_id: &str,
        user_id: &str,
    ) -> PortResult<Option<ClinicMembership>> {
        Ok(self.find_membership_row(clinic_id, user_id)?)
    }

    fn memberships_for_clinic(&self, clinic_id: &str) -> PortResult<Vec<ClinicMembership>> {
        Ok(self.list_memberships_for_clinic(clinic_id)?)
    }
}

/// Intermediate row struct for database mapping.
struct MembershipRow {
    membership_id: String,
    clinic_id: String,
    user_id: String,
    role: String,
    engagement: String,
    status: String,
    valid_from: String,
    valid_until: Option<String>,
    created_at: String,
    version: i64,
}

impl MembershipRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            membership_id: row.get(0)?,
            clinic_id: row.get(1)?,
            user_id: row.get(2)?,
            role: row.get(3)?,
            engagement: row.get(4)?,
            status: row.get(5)?,
            valid_from: row.get(6)?,
            valid_until: row.get(7)?,
            created_at: row.get(8)?,
            version: row.get(9)?,
        })
    }
}

impl TryFrom<MembershipRow> for ClinicMembership {
    type Error = DbError;

    fn try_from(row: MembershipRow) -> Result<Self, Self::Error> {
        let validity = ValidityWindow::new(
            from_sql_ts(&row.valid_from)?,
            from_sql_ts_opt(row.valid_until)?,
        )
        .map_err(|e| DbError::Constraint(e.to_string()))?;

        Ok(ClinicMembership {
            membership_id: row.membership_id,
            clinic_id: row.clinic_id,
            user_id: row.user_id,
            role: parse_column(&row.role)?,
            engagement: parse_column(&row.engagement)?,
            status: parse_column(&row.status)?,
            validity,
            created_at: from_sql_ts(&row.created_at)?,
            version: row.version,
            pending_events: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClinicRole, EngagementKind, MembershipStatus};
    use crate::ports::PortError;
    use chrono::{TimeZone, Utc};

    fn make_membership(clinic: &str, user: &str) -> ClinicMembership {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        ClinicMembership::grant(
            clinic.into(),
            user.into(),
            ClinicRole::Veterinarian,
            EngagementKind::Employee,
            ValidityWindow::starting(from),
            from,
        )
    }

    #[test]
    fn test_insert_and_find() {
        let db = Database::open_in_memory().unwrap();
        let membership = make_membership("clinic-1", "vet-1");
        db.insert_membership(&membership).unwrap();

        let found = db.find_membership("clinic-1", "vet-1").unwrap().unwrap();
        assert_eq!(found.membership_id, membership.membership_id);
        assert_eq!(found.role, ClinicRole::Veterinarian);
        assert_eq!(found.validity, membership.validity);
        assert!(db.find_membership("clinic-2", "vet-1").unwrap().is_none());
    }

    #[test]
    fn test_unique_clinic_user() {
        let db = Database::open_in_memory().unwrap();
        db.insert_membership(&make_membership("clinic-1", "vet-1")).unwrap();
        let result = db.insert_membership(&make_membership("clinic-1", "vet-1"));
        assert!(matches!(result, Err(PortError::Constraint(_))));
    }

    #[test]
    fn test_stale_update_rejected() {
        let db = Database::open_in_memory().unwrap();
        let mut membership = make_membership("clinic-1", "vet-1");
        db.insert_membership(&membership).unwrap();

        membership.status = MembershipStatus::Disabled;
        db.update_membership(&membership).unwrap();

        // Still carrying version 0 while the row is at 1.
        let result = db.update_membership(&membership);
        assert!(matches!(result, Err(PortError::StaleVersion { .. })));

        let stored = db.get_membership(&membership.membership_id).unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.status, MembershipStatus::Disabled);
    }
}
