//! Keyed repository over the appointment, test-result, package, and
//! activity-log entities.
//!
//! The store enforces no cross-entity invariants itself; the reconcile and
//! action logic maintain them. All mutations are either whole-row inserts or
//! named-property patches so that callers can express idempotent upserts.

use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use uuid::Uuid;

use super::DatabaseError;
use crate::models::*;

const DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Shared handle to the record database. Cheap to clone.
#[derive(Clone)]
pub struct RecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl RecordStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// In-memory store with migrations applied (tests and local runs).
    pub fn in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::new(super::sqlite::open_memory_database()?))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)
    }

    // ─── Appointments ─────────────────────────────────────────────────────

    pub fn get_appointment(&self, id: &Uuid) -> Result<Option<Appointment>, DatabaseError> {
        let conn = self.conn()?;
        query_appointment(&conn, "id = ?1", params![id.to_string()])
    }

    /// The appointment for an external scheduling id. Prefers the single
    /// non-canceled row when both exist.
    pub fn find_appointment_by_external_id(
        &self,
        external_id: i64,
    ) -> Result<Option<Appointment>, DatabaseError> {
        let conn = self.conn()?;
        query_appointment(
            &conn,
            "external_id = ?1 ORDER BY canceled ASC, created_at DESC",
            params![external_id],
        )
    }

    pub fn find_appointment_by_barcode(
        &self,
        barcode: &str,
    ) -> Result<Option<Appointment>, DatabaseError> {
        let conn = self.conn()?;
        query_appointment(&conn, "barcode = ?1", params![barcode])
    }

    /// All appointments scheduled within `[from, to]` (inclusive). Used by
    /// the bulk processor to avoid one lookup per row.
    pub fn appointments_scheduled_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Appointment>, DatabaseError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {APPOINTMENT_COLS} FROM appointments
             WHERE scheduled_at >= ?1 AND scheduled_at < ?2
             ORDER BY scheduled_at ASC"
        ))?;
        let next_day = to.succ_opt().unwrap_or(to);
        let rows = stmt.query_map(
            params![from.to_string(), next_day.to_string()],
            appointment_row,
        )?;

        let mut out = Vec::new();
        for row in rows {
            out.push(appointment_from_row(row?)?);
        }
        Ok(out)
    }

    pub fn add_appointment(&self, appt: &Appointment) -> Result<(), DatabaseError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO appointments (id, external_id, status, organization_id, package_code,
             barcode, latest_result, scheduled_at, deadline, first_name, last_name, email,
             phone, date_of_birth, canceled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                appt.id.to_string(),
                appt.external_id,
                appt.status.as_str(),
                appt.organization_id,
                appt.package_code,
                appt.barcode,
                appt.latest_result.as_str(),
                appt.scheduled_at.map(|d| d.to_string()),
                appt.deadline.map(|d| d.to_string()),
                appt.first_name,
                appt.last_name,
                appt.email,
                appt.phone,
                appt.date_of_birth.map(|d| d.to_string()),
                appt.canceled as i32,
                appt.created_at.to_string(),
                appt.updated_at.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Apply a named-property patch. No-op when the patch is empty.
    pub fn update_appointment(
        &self,
        id: &Uuid,
        patch: &AppointmentPatch,
    ) -> Result<(), DatabaseError> {
        if patch.is_empty() {
            return Ok(());
        }
        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        push_set(&mut sets, &mut values, "status", patch.status.map(|s| s.as_str().to_string()));
        push_set(&mut sets, &mut values, "organization_id", patch.organization_id.clone());
        push_set(&mut sets, &mut values, "barcode", patch.barcode.clone());
        push_set(&mut sets, &mut values, "latest_result", patch.latest_result.map(|r| r.as_str().to_string()));
        push_set(&mut sets, &mut values, "canceled", patch.canceled.map(|b| (b as i64).to_string()));
        push_set(&mut sets, &mut values, "scheduled_at", patch.scheduled_at.map(|d| d.to_string()));
        push_set(&mut sets, &mut values, "deadline", patch.deadline.map(|d| d.to_string()));
        push_set(&mut sets, &mut values, "first_name", patch.first_name.clone());
        push_set(&mut sets, &mut values, "last_name", patch.last_name.clone());
        push_set(&mut sets, &mut values, "email", patch.email.clone());
        push_set(&mut sets, &mut values, "phone", patch.phone.clone());
        push_set(&mut sets, &mut values, "date_of_birth", patch.date_of_birth.map(|d| d.to_string()));

        self.run_patch("appointments", id, sets, values)
    }

    // ─── Test results ─────────────────────────────────────────────────────

    pub fn get_result(&self, id: &Uuid) -> Result<Option<TestResult>, DatabaseError> {
        let conn = self.conn()?;
        query_result(&conn, "id = ?1", params![id.to_string()])
    }

    /// The single row currently eligible to receive a reported outcome.
    pub fn get_waiting_result(
        &self,
        appointment_id: &Uuid,
    ) -> Result<Option<TestResult>, DatabaseError> {
        let conn = self.conn()?;
        query_result(
            &conn,
            "appointment_id = ?1 AND waiting_result = 1 ORDER BY created_at DESC",
            params![appointment_id.to_string()],
        )
    }

    pub fn find_results_by_barcode(&self, barcode: &str) -> Result<Vec<TestResult>, DatabaseError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RESULT_COLS} FROM test_results WHERE barcode = ?1 ORDER BY created_at ASC"
        ))?;
        let rows = stmt.query_map(params![barcode], result_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(result_from_row(row?)?);
        }
        Ok(out)
    }

    pub fn results_for_appointment(
        &self,
        appointment_id: &Uuid,
    ) -> Result<Vec<TestResult>, DatabaseError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RESULT_COLS} FROM test_results
             WHERE appointment_id = ?1 ORDER BY created_at ASC"
        ))?;
        let rows = stmt.query_map(params![appointment_id.to_string()], result_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(result_from_row(row?)?);
        }
        Ok(out)
    }

    pub fn add_result(&self, result: &TestResult) -> Result<(), DatabaseError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO test_results (id, appointment_id, barcode, result, waiting_result,
             recollected, run_number, re_collect_number, display_in_result, confirmed,
             previous_result, linked_barcodes, organization_id, admin_id, result_analysis,
             result_date, first_name, last_name, date_of_birth, test_type, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19, ?20, ?21, ?22)",
            params![
                result.id.to_string(),
                result.appointment_id.to_string(),
                result.barcode,
                result.result.as_str(),
                result.waiting_result as i32,
                result.recollected as i32,
                result.run_number,
                result.re_collect_number,
                result.display_in_result as i32,
                result.confirmed as i32,
                result.previous_result.map(|r| r.as_str()),
                serde_json::to_string(&result.linked_barcodes)
                    .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
                result.organization_id,
                result.admin_id,
                serde_json::to_string(&result.result_analysis)
                    .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
                result.result_date.map(|d| d.to_string()),
                result.first_name,
                result.last_name,
                result.date_of_birth.map(|d| d.to_string()),
                result.test_type,
                result.created_at.to_string(),
                result.updated_at.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Apply a named-property patch. No-op when the patch is empty.
    pub fn update_result(&self, id: &Uuid, patch: &TestResultPatch) -> Result<(), DatabaseError> {
        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        push_set(&mut sets, &mut values, "barcode", patch.barcode.clone());
        push_set(&mut sets, &mut values, "result", patch.result.map(|r| r.as_str().to_string()));
        push_set(&mut sets, &mut values, "waiting_result", patch.waiting_result.map(|b| (b as i64).to_string()));
        push_set(&mut sets, &mut values, "recollected", patch.recollected.map(|b| (b as i64).to_string()));
        push_set(&mut sets, &mut values, "run_number", patch.run_number.map(|n| n.to_string()));
        push_set(&mut sets, &mut values, "re_collect_number", patch.re_collect_number.map(|n| n.to_string()));
        push_set(&mut sets, &mut values, "display_in_result", patch.display_in_result.map(|b| (b as i64).to_string()));
        push_set(&mut sets, &mut values, "confirmed", patch.confirmed.map(|b| (b as i64).to_string()));
        push_set(&mut sets, &mut values, "previous_result", patch.previous_result.map(|r| r.as_str().to_string()));
        if let Some(linked) = &patch.linked_barcodes {
            sets.push("linked_barcodes");
            values.push(SqlValue::Text(
                serde_json::to_string(linked)
                    .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
            ));
        }
        push_set(&mut sets, &mut values, "organization_id", patch.organization_id.clone());
        push_set(&mut sets, &mut values, "admin_id", patch.admin_id.clone());
        if let Some(analysis) = &patch.result_analysis {
            sets.push("result_analysis");
            values.push(SqlValue::Text(
                serde_json::to_string(analysis)
                    .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
            ));
        }
        push_set(&mut sets, &mut values, "result_date", patch.result_date.map(|d| d.to_string()));
        push_set(&mut sets, &mut values, "first_name", patch.first_name.clone());
        push_set(&mut sets, &mut values, "last_name", patch.last_name.clone());
        push_set(&mut sets, &mut values, "date_of_birth", patch.date_of_birth.map(|d| d.to_string()));
        push_set(&mut sets, &mut values, "test_type", patch.test_type.clone());

        if sets.is_empty() {
            return Ok(());
        }
        self.run_patch("test_results", id, sets, values)
    }

    pub fn delete_result(&self, id: &Uuid) -> Result<(), DatabaseError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM test_results WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    }

    // ─── Packages ─────────────────────────────────────────────────────────

    pub fn get_package(&self, code: &str) -> Result<Option<Package>, DatabaseError> {
        let conn = self.conn()?;
        let result = conn.query_row(
            "SELECT code, organization_id, name FROM packages WHERE code = ?1",
            params![code],
            |row| {
                Ok(Package {
                    code: row.get(0)?,
                    organization_id: row.get(1)?,
                    name: row.get(2)?,
                })
            },
        );
        match result {
            Ok(pkg) => Ok(Some(pkg)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn upsert_package(&self, pkg: &Package) -> Result<(), DatabaseError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO packages (code, organization_id, name) VALUES (?1, ?2, ?3)
             ON CONFLICT(code) DO UPDATE SET organization_id = ?2, name = ?3",
            params![pkg.code, pkg.organization_id, pkg.name],
        )?;
        Ok(())
    }

    // ─── Activity log (append-only) ───────────────────────────────────────

    pub fn append_activity(&self, entry: &ActivityEntry) -> Result<(), DatabaseError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO activity_log (id, entity_id, action, actor, current_data, new_data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.id.to_string(),
                entry.entity_id,
                entry.action.as_str(),
                entry.actor,
                entry.current_data.to_string(),
                entry.new_data.to_string(),
                entry.created_at.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn activity_for_entity(
        &self,
        entity_id: &str,
    ) -> Result<Vec<ActivityEntry>, DatabaseError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, entity_id, action, actor, current_data, new_data, created_at
             FROM activity_log WHERE entity_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![entity_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, entity_id, action, actor, current_data, new_data, created_at) = row?;
            out.push(ActivityEntry {
                id: parse_uuid(&id)?,
                entity_id,
                action: ActivityAction::from_str(&action)?,
                actor,
                current_data: serde_json::from_str(&current_data).unwrap_or_default(),
                new_data: serde_json::from_str(&new_data).unwrap_or_default(),
                created_at: parse_datetime(&created_at),
            });
        }
        Ok(out)
    }

    // ─── Barcode counter ──────────────────────────────────────────────────

    /// Atomically advance the sequential barcode counter and return its new
    /// value. Formatting into a barcode is the allocator's job.
    pub fn advance_barcode_counter(&self) -> Result<i64, DatabaseError> {
        let conn = self.conn()?;
        conn.execute("UPDATE barcode_counter SET value = value + 1 WHERE id = 1", [])?;
        let value = conn.query_row(
            "SELECT value FROM barcode_counter WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(value)
    }

    // ─── Internal ─────────────────────────────────────────────────────────

    fn run_patch(
        &self,
        table: &str,
        id: &Uuid,
        sets: Vec<&str>,
        mut values: Vec<SqlValue>,
    ) -> Result<(), DatabaseError> {
        let assignments: Vec<String> = sets
            .iter()
            .enumerate()
            .map(|(i, col)| format!("{col} = ?{}", i + 1))
            .collect();
        let sql = format!(
            "UPDATE {table} SET {}, updated_at = ?{} WHERE id = ?{}",
            assignments.join(", "),
            values.len() + 1,
            values.len() + 2,
        );
        values.push(SqlValue::Text(now().to_string()));
        values.push(SqlValue::Text(id.to_string()));

        let conn = self.conn()?;
        let changed = conn.execute(&sql, params_from_iter(values))?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity_type: table.into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }
}

pub fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

fn push_set(sets: &mut Vec<&str>, values: &mut Vec<SqlValue>, col: &'static str, v: Option<String>) {
    if let Some(v) = v {
        sets.push(col);
        values.push(SqlValue::Text(v));
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))
}

fn parse_datetime(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, DATETIME_FMT).unwrap_or_default()
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

// ─── Appointment row mapping ──────────────────────────────────────────────

const APPOINTMENT_COLS: &str = "id, external_id, status, organization_id, package_code, barcode,
    latest_result, scheduled_at, deadline, first_name, last_name, email, phone, date_of_birth,
    canceled, created_at, updated_at";

struct AppointmentRow {
    id: String,
    external_id: i64,
    status: String,
    organization_id: Option<String>,
    package_code: Option<String>,
    barcode: Option<String>,
    latest_result: String,
    scheduled_at: Option<String>,
    deadline: Option<String>,
    first_name: String,
    last_name: String,
    email: Option<String>,
    phone: Option<String>,
    date_of_birth: Option<String>,
    canceled: i32,
    created_at: String,
    updated_at: String,
}

fn appointment_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AppointmentRow> {
    Ok(AppointmentRow {
        id: row.get(0)?,
        external_id: row.get(1)?,
        status: row.get(2)?,
        organization_id: row.get(3)?,
        package_code: row.get(4)?,
        barcode: row.get(5)?,
        latest_result: row.get(6)?,
        scheduled_at: row.get(7)?,
        deadline: row.get(8)?,
        first_name: row.get(9)?,
        last_name: row.get(10)?,
        email: row.get(11)?,
        phone: row.get(12)?,
        date_of_birth: row.get(13)?,
        canceled: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

fn appointment_from_row(row: AppointmentRow) -> Result<Appointment, DatabaseError> {
    Ok(Appointment {
        id: parse_uuid(&row.id)?,
        external_id: row.external_id,
        status: AppointmentStatus::from_str(&row.status)?,
        organization_id: row.organization_id,
        package_code: row.package_code,
        barcode: row.barcode,
        latest_result: ResultType::from_str(&row.latest_result)?,
        scheduled_at: row.scheduled_at.map(|s| parse_datetime(&s)),
        deadline: row.deadline.map(|s| parse_datetime(&s)),
        first_name: row.first_name,
        last_name: row.last_name,
        email: row.email,
        phone: row.phone,
        date_of_birth: row.date_of_birth.as_deref().and_then(parse_date),
        canceled: row.canceled != 0,
        created_at: parse_datetime(&row.created_at),
        updated_at: parse_datetime(&row.updated_at),
    })
}

fn query_appointment(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> Result<Option<Appointment>, DatabaseError> {
    let sql = format!("SELECT {APPOINTMENT_COLS} FROM appointments WHERE {filter} LIMIT 1");
    let mut stmt = conn.prepare(&sql)?;
    let result = stmt.query_row(params, appointment_row);
    match result {
        Ok(row) => Ok(Some(appointment_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// ─── Test-result row mapping ──────────────────────────────────────────────

const RESULT_COLS: &str = "id, appointment_id, barcode, result, waiting_result, recollected,
    run_number, re_collect_number, display_in_result, confirmed, previous_result,
    linked_barcodes, organization_id, admin_id, result_analysis, result_date,
    first_name, last_name, date_of_birth, test_type, created_at, updated_at";

struct ResultRow {
    id: String,
    appointment_id: String,
    barcode: Option<String>,
    result: String,
    waiting_result: i32,
    recollected: i32,
    run_number: i64,
    re_collect_number: i64,
    display_in_result: i32,
    confirmed: i32,
    previous_result: Option<String>,
    linked_barcodes: String,
    organization_id: Option<String>,
    admin_id: Option<String>,
    result_analysis: String,
    result_date: Option<String>,
    first_name: String,
    last_name: String,
    date_of_birth: Option<String>,
    test_type: Option<String>,
    created_at: String,
    updated_at: String,
}

fn result_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ResultRow> {
    Ok(ResultRow {
        id: row.get(0)?,
        appointment_id: row.get(1)?,
        barcode: row.get(2)?,
        result: row.get(3)?,
        waiting_result: row.get(4)?,
        recollected: row.get(5)?,
        run_number: row.get(6)?,
        re_collect_number: row.get(7)?,
        display_in_result: row.get(8)?,
        confirmed: row.get(9)?,
        previous_result: row.get(10)?,
        linked_barcodes: row.get(11)?,
        organization_id: row.get(12)?,
        admin_id: row.get(13)?,
        result_analysis: row.get(14)?,
        result_date: row.get(15)?,
        first_name: row.get(16)?,
        last_name: row.get(17)?,
        date_of_birth: row.get(18)?,
        test_type: row.get(19)?,
        created_at: row.get(20)?,
        updated_at: row.get(21)?,
    })
}

fn result_from_row(row: ResultRow) -> Result<TestResult, DatabaseError> {
    Ok(TestResult {
        id: parse_uuid(&row.id)?,
        appointment_id: parse_uuid(&row.appointment_id)?,
        barcode: row.barcode,
        result: ResultType::from_str(&row.result)?,
        waiting_result: row.waiting_result != 0,
        recollected: row.recollected != 0,
        run_number: row.run_number,
        re_collect_number: row.re_collect_number,
        display_in_result: row.display_in_result != 0,
        confirmed: row.confirmed != 0,
        previous_result: row
            .previous_result
            .as_deref()
            .map(ResultType::from_str)
            .transpose()?,
        linked_barcodes: serde_json::from_str(&row.linked_barcodes).unwrap_or_default(),
        organization_id: row.organization_id,
        admin_id: row.admin_id,
        result_analysis: serde_json::from_str(&row.result_analysis).unwrap_or_default(),
        result_date: row.result_date.as_deref().and_then(parse_date),
        first_name: row.first_name,
        last_name: row.last_name,
        date_of_birth: row.date_of_birth.as_deref().and_then(parse_date),
        test_type: row.test_type,
        created_at: parse_datetime(&row.created_at),
        updated_at: parse_datetime(&row.updated_at),
    })
}

fn query_result(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> Result<Option<TestResult>, DatabaseError> {
    let sql = format!("SELECT {RESULT_COLS} FROM test_results WHERE {filter} LIMIT 1");
    let mut stmt = conn.prepare(&sql)?;
    let result = stmt.query_row(params, result_row);
    match result {
        Ok(row) => Ok(Some(result_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
