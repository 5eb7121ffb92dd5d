//! SQLite shift store.
//!
//! `shifts.payload_json` is the source of truth. The `bookings` table is a
//! lookup index for overlap checks: `write_shift` rebuilds a shift's rows
//! from its payload on every write and `delete_shift` drops them, so it
//! never holds a booking the payloads do not imply.

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use shift_core::events::Event;
use shift_core::types::{CompanyId, ResourceBooking, ResourceRef, Shift, ShiftId};
use shift_core::window::ShiftWindow;
use std::path::Path;
use std::sync::Mutex;

use crate::store::{sort_shifts, CommitBatch, Mutation, ShiftQuery, ShiftStore, StoreError, StoreTx};

const SPAN_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const SHIFT_SEQUENCE: &str = "shift";

/// Durable store. Commands take an IMMEDIATE transaction so concurrent
/// writers on the same file serialize at `BEGIN`.
#[derive(Debug)]
pub struct SqliteShiftStore {
    conn: Mutex<Connection>,
}

impl SqliteShiftStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS shifts (
    shift_id TEXT PRIMARY KEY,
    company_id TEXT NOT NULL,
    family TEXT NOT NULL,
    status_tag TEXT NOT NULL,
    shift_date TEXT NOT NULL,
    version INTEGER NOT NULL,
    payload_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_shifts_company_date ON shifts(company_id, shift_date);
CREATE INDEX IF NOT EXISTS idx_shifts_status ON shifts(status_tag);

-- Index derived from shifts.payload_json; rebuilt per written shift.
CREATE TABLE IF NOT EXISTS bookings (
    shift_id TEXT NOT NULL,
    company_id TEXT NOT NULL,
    resource_kind TEXT NOT NULL,
    resource_id TEXT NOT NULL,
    start_at TEXT NOT NULL,
    end_at TEXT NOT NULL,
    window_json TEXT NOT NULL,
    PRIMARY KEY (shift_id, resource_kind, resource_id)
);

CREATE INDEX IF NOT EXISTS idx_bookings_resource
    ON bookings(company_id, resource_kind, resource_id, start_at);

CREATE TABLE IF NOT EXISTS events (
    event_id TEXT PRIMARY KEY,
    shift_id TEXT NOT NULL,
    company_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    at TEXT NOT NULL,
    kind_tag TEXT NOT NULL,
    payload_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_shift ON events(shift_id, version);

CREATE TABLE IF NOT EXISTS sequences (
    name TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
"#,
        )?;
        Ok(())
    }
}

fn load_shift(conn: &Connection, shift_id: &ShiftId) -> Result<Option<Shift>, StoreError> {
    let payload: Option<String> = conn
        .query_row(
            "SELECT payload_json FROM shifts WHERE shift_id = ?1",
            params![shift_id.0],
            |row| row.get(0),
        )
        .optional()?;
    payload
        .map(|value| serde_json::from_str::<Shift>(&value))
        .transpose()
        .map_err(StoreError::from)
}

fn current_version(conn: &Connection, shift_id: &ShiftId) -> Result<Option<u64>, StoreError> {
    let version: Option<i64> = conn
        .query_row(
            "SELECT version FROM shifts WHERE shift_id = ?1",
            params![shift_id.0],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version.map(|v| v as u64))
}

fn expect_version(
    conn: &Connection,
    shift_id: &ShiftId,
    expected: u64,
) -> Result<(), StoreError> {
    match current_version(conn, shift_id)? {
        None => Err(StoreError::Missing {
            shift_id: shift_id.clone(),
        }),
        Some(actual) if actual != expected => Err(StoreError::StaleVersion {
            shift_id: shift_id.clone(),
            expected,
            actual,
        }),
        Some(_) => Ok(()),
    }
}

fn write_shift(conn: &Connection, shift: &Shift) -> Result<(), StoreError> {
    let payload = serde_json::to_string(shift)?;
    conn.execute(
        r#"
INSERT INTO shifts (shift_id, company_id, family, status_tag, shift_date, version, payload_json, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
ON CONFLICT(shift_id) DO UPDATE SET
  company_id = excluded.company_id,
  family = excluded.family,
  status_tag = excluded.status_tag,
  shift_date = excluded.shift_date,
  version = excluded.version,
  payload_json = excluded.payload_json,
  updated_at = excluded.updated_at
"#,
        params![
            shift.id.0,
            shift.company_id.0,
            shift.family.as_str(),
            shift.status.as_str(),
            shift.window.date.to_string(),
            shift.version as i64,
            payload,
            shift.created_at.to_rfc3339(),
            shift.updated_at.to_rfc3339(),
        ],
    )?;
    write_bookings(conn, shift)
}

/// Replaces the booking rows of one shift with its current active set.
fn write_bookings(conn: &Connection, shift: &Shift) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM bookings WHERE shift_id = ?1",
        params![shift.id.0],
    )?;
    let mut stmt = conn.prepare(
        r#"
INSERT OR REPLACE INTO bookings (shift_id, company_id, resource_kind, resource_id, start_at, end_at, window_json)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
"#,
    )?;
    for booking in shift.bookings() {
        let span = booking.span();
        stmt.execute(params![
            booking.shift_id.0,
            booking.company_id.0,
            booking.resource.kind.as_str(),
            booking.resource.id.0,
            span.start.format(SPAN_FORMAT).to_string(),
            span.end.format(SPAN_FORMAT).to_string(),
            serde_json::to_string(&booking.window)?,
        ])?;
    }
    Ok(())
}

fn delete_shift(conn: &Connection, shift_id: &ShiftId) -> Result<(), StoreError> {
    conn.execute("DELETE FROM bookings WHERE shift_id = ?1", params![shift_id.0])?;
    conn.execute("DELETE FROM shifts WHERE shift_id = ?1", params![shift_id.0])?;
    Ok(())
}

fn append_event(conn: &Connection, event: &Event) -> Result<(), StoreError> {
    let payload = serde_json::to_string(event)?;
    conn.execute(
        r#"
INSERT INTO events (event_id, shift_id, company_id, version, at, kind_tag, payload_json)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
"#,
        params![
            event.id.0,
            event.shift_id.0,
            event.company_id.0,
            event.version as i64,
            event.at.to_rfc3339(),
            event.kind.tag(),
            payload,
        ],
    )?;
    Ok(())
}

fn load_bookings(
    conn: &Connection,
    company_id: &CompanyId,
    resource: &ResourceRef,
) -> Result<Vec<ResourceBooking>, StoreError> {
    let mut stmt = conn.prepare(
        r#"
SELECT shift_id, window_json FROM bookings
WHERE company_id = ?1 AND resource_kind = ?2 AND resource_id = ?3
ORDER BY start_at ASC, shift_id ASC
"#,
    )?;
    let rows = stmt.query_map(
        params![company_id.0, resource.kind.as_str(), resource.id.0],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
    )?;
    let mut bookings = Vec::new();
    for row in rows {
        let (shift_id, window_json) = row?;
        let window: ShiftWindow = serde_json::from_str(&window_json)?;
        bookings.push(ResourceBooking {
            resource: resource.clone(),
            company_id: company_id.clone(),
            window,
            shift_id: ShiftId(shift_id),
        });
    }
    Ok(bookings)
}

struct SqliteTx<'c> {
    tx: rusqlite::Transaction<'c>,
}

impl StoreTx for SqliteTx<'_> {
    fn load(&mut self, shift_id: &ShiftId) -> Result<Option<Shift>, StoreError> {
        load_shift(&self.tx, shift_id)
    }

    fn load_active_bookings_for(
        &mut self,
        company_id: &CompanyId,
        resource: &ResourceRef,
    ) -> Result<Vec<ResourceBooking>, StoreError> {
        load_bookings(&self.tx, company_id, resource)
    }

    fn allocate_shift_id(&mut self) -> Result<ShiftId, StoreError> {
        self.tx.execute(
            r#"
INSERT INTO sequences (name, value) VALUES (?1, 1)
ON CONFLICT(name) DO UPDATE SET value = value + 1
"#,
            params![SHIFT_SEQUENCE],
        )?;
        let value: i64 = self.tx.query_row(
            "SELECT value FROM sequences WHERE name = ?1",
            params![SHIFT_SEQUENCE],
            |row| row.get(0),
        )?;
        Ok(ShiftId::from_sequence(value as u64))
    }

    fn commit(&mut self, batch: CommitBatch) -> Result<(), StoreError> {
        for mutation in &batch.mutations {
            match mutation {
                Mutation::Insert(shift) => {
                    if current_version(&self.tx, &shift.id)?.is_some() {
                        return Err(StoreError::Duplicate {
                            shift_id: shift.id.clone(),
                        });
                    }
                }
                Mutation::Update {
                    shift,
                    expected_version,
                } => expect_version(&self.tx, &shift.id, *expected_version)?,
                Mutation::Delete {
                    shift_id,
                    expected_version,
                } => expect_version(&self.tx, shift_id, *expected_version)?,
            }
        }

        for mutation in &batch.mutations {
            match mutation {
                Mutation::Insert(shift) | Mutation::Update { shift, .. } => {
                    write_shift(&self.tx, shift)?
                }
                Mutation::Delete { shift_id, .. } => delete_shift(&self.tx, shift_id)?,
            }
        }
        for event in &batch.events {
            append_event(&self.tx, event)?;
        }
        Ok(())
    }
}

impl ShiftStore for SqliteShiftStore {
    fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let mut store_tx = SqliteTx { tx };
        let out = f(&mut store_tx)?;
        store_tx.tx.commit().map_err(StoreError::from)?;
        Ok(out)
    }

    fn load(&self, shift_id: &ShiftId) -> Result<Option<Shift>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        load_shift(&conn, shift_id)
    }

    fn list_shifts(&self, query: &ShiftQuery) -> Result<Vec<Shift>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare(
            r#"
SELECT payload_json FROM shifts
WHERE company_id = ?1
  AND (?2 IS NULL OR shift_date >= ?2)
  AND (?3 IS NULL OR shift_date <= ?3)
  AND (?4 IS NULL OR status_tag = ?4)
"#,
        )?;
        let rows = stmt.query_map(
            params![
                query.company_id.0,
                query.from.map(|d| d.to_string()),
                query.to.map(|d| d.to_string()),
                query.status.map(|s| s.as_str()),
            ],
            |row| row.get::<_, String>(0),
        )?;
        let mut shifts = Vec::new();
        for row in rows {
            let payload = row?;
            shifts.push(serde_json::from_str::<Shift>(&payload)?);
        }
        sort_shifts(&mut shifts);
        Ok(shifts)
    }

    fn events_for(&self, shift_id: &ShiftId) -> Result<Vec<Event>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare(
            "SELECT payload_json FROM events WHERE shift_id = ?1 ORDER BY version ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![shift_id.0], |row| row.get::<_, String>(0))?;
        let mut events = Vec::new();
        for row in rows {
            let payload = row?;
            events.push(serde_json::from_str::<Event>(&payload)?);
        }
        Ok(events)
    }
}
