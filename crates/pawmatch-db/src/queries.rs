use crate::models::{AnimalRow, ShelterRow, UserRow};
use crate::{Database, OptionalExt};
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, name: &str, email: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, email, password) VALUES (?1, ?2, ?3, ?4)",
                (id, name, email, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Existence check backing the X-User-Id identity fallback.
    pub fn user_exists(&self, id: &str) -> Result<bool> {
        Ok(self.get_user(id)?.is_some())
    }

    // -- Shelters --

    pub fn create_shelter(
        &self,
        id: &str,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO shelters (id, name, email, password) VALUES (?1, ?2, ?3, ?4)",
                (id, name, email, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_shelter_by_email(&self, email: &str) -> Result<Option<ShelterRow>> {
        self.with_conn(|conn| query_shelter(conn, "email", email))
    }

    pub fn get_shelter(&self, id: &str) -> Result<Option<ShelterRow>> {
        self.with_conn(|conn| query_shelter(conn, "id", id))
    }

    // -- Animals --

    pub fn create_animal(
        &self,
        id: &str,
        shelter_id: Option<&str>,
        name: &str,
        photo: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO animals (id, shelter_id, name, photo) VALUES (?1, ?2, ?3, ?4)",
                (id, shelter_id, name, photo),
            )?;
            Ok(())
        })
    }

    pub fn get_animal(&self, id: &str) -> Result<Option<AnimalRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, shelter_id, name, photo, created_at FROM animals WHERE id = ?1",
                [id],
                |row| {
                    Ok(AnimalRow {
                        id: row.get(0)?,
                        shelter_id: row.get(1)?,
                        name: row.get(2)?,
                        photo: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT id, name, email, password, created_at FROM users WHERE {column} = ?1");
    conn.query_row(&sql, [value], |row| {
        Ok(UserRow {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            password: row.get(3)?,
            created_at: row.get(4)?,
        })
    })
    .optional()
}

fn query_shelter(conn: &Connection, column: &str, value: &str) -> Result<Option<ShelterRow>> {
    let sql =
        format!("SELECT id, name, email, password, created_at FROM shelters WHERE {column} = ?1");
    conn.query_row(&sql, [value], |row| {
        Ok(ShelterRow {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            password: row.get(3)?,
            created_at: row.get(4)?,
        })
    })
    .optional()
}
