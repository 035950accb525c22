//! Owner and animal reference records.
//!
//! The engine only needs to know that these exist; their full records live
//! in another system, which pushes the minimal projection kept here.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{from_sql_ts, to_sql_ts, Database, DbResult};
use crate::ports::{AnimalExistenceChecker, OwnerExistenceChecker, PortResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OwnerReference {
    pub owner_id: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnimalReference {
    pub animal_id: String,
    pub owner_id: Option<String>,
    pub name: String,
    pub species: String,
    pub created_at: DateTime<Utc>,
}

impl Database {
    /// Insert or refresh an owner.
    pub fn upsert_owner_reference(&self, owner: &OwnerReference) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO owners (owner_id, display_name, created_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(owner_id) DO UPDATE SET display_name = excluded.display_name
            "#,
            params![owner.owner_id, owner.display_name, to_sql_ts(owner.created_at)],
        )?;
        Ok(())
    }

    /// Insert or refresh an animal. A referenced owner must already exist.
    pub fn upsert_animal_reference(&self, animal: &AnimalReference) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO animals (animal_id, owner_id, name, species, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(animal_id) DO UPDATE SET
                owner_id = excluded.owner_id,
                name = excluded.name,
                species = excluded.species
            "#,
            params![
                animal.animal_id,
                animal.owner_id,
                animal.name,
                animal.species,
                to_sql_ts(animal.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_owner_reference(&self, owner_id: &str) -> DbResult<Option<OwnerReference>> {
        let row = self
            .conn
            .query_row(
                "SELECT owner_id, display_name, created_at FROM owners WHERE owner_id = ?",
                [owner_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(owner_id, display_name, created_at)| {
            Ok(OwnerReference {
                owner_id,
                display_name,
                created_at: from_sql_ts(&created_at)?,
            })
        })
        .transpose()
    }

    fn row_exists(&self, sql: &str, id: &str) -> DbResult<bool> {
        Ok(self.conn.query_row(sql, [id], |row| row.get(0))?)
    }
}

impl OwnerExistenceChecker for Database {
    fn exists(&self, owner_id: &str) -> PortResult<bool> {
        Ok(self.row_exists(
            "SELECT EXISTS (SELECT 1 FROM owners WHERE owner_id = ?)",
            owner_id,
        )?)
    }
}

impl AnimalExistenceChecker for Database {
    fn exists(&self, animal_id: &str) -> PortResult<bool> {
        Ok(self.row_exists(
            "SELECT EXISTS (SELECT 1 FROM animals WHERE animal_id = ?)",
            animal_id,
        )?)
    }
}
