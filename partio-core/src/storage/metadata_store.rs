use crate::error::{PartioError, Result};
use crate::model::{Part, TransferStatus, Upload};
use crate::storage::database::Database;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, ffi, params, params_from_iter};
use ulid::Ulid;

const PART_COLUMNS: &str = "id, upload_id, backend_address, number, size, status, created_at";

/// Upload and part bookkeeping.
///
/// Implemented by [`MetadataStore`], which opens a fresh connection per call,
/// and by [`TxMetadataStore`], which runs every statement on a caller-owned
/// transaction.
pub trait MetadataQueries {
    fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T>;

    fn insert_upload(&self, upload: &Upload) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO uploads (id, name, size, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    upload.id.to_string(),
                    upload.name,
                    upload.size as i64,
                    upload.status.as_str(),
                    encode_timestamp(&upload.created_at),
                ],
            )
            .map_err(|error| map_insert_error(error, "upload", &upload.id))?;
            Ok(())
        })
    }

    fn insert_part(&self, part: &Part) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO parts (
                    id, upload_id, backend_address, number, size, status, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    part.id.to_string(),
                    part.upload_id.to_string(),
                    part.backend,
                    part.number,
                    part.size as i64,
                    part.status.as_str(),
                    encode_timestamp(&part.created_at),
                ],
            )
            .map_err(|error| map_insert_error(error, "part", &part.id))?;
            Ok(())
        })
    }

    fn mark_part_done(&self, part_id: Ulid) -> Result<()> {
        self.with_connection(|conn| {
            let affected = conn.execute(
                "UPDATE parts SET status = ?1 WHERE id = ?2",
                params![TransferStatus::Done.as_str(), part_id.to_string()],
            )?;

            if affected == 0 {
                return Err(PartioError::NotFound(format!("part {}", part_id)));
            }
            Ok(())
        })
    }

    fn mark_upload_done(&self, upload_id: Ulid) -> Result<()> {
        self.with_connection(|conn| {
            let affected = conn.execute(
                "UPDATE uploads SET status = ?1 WHERE id = ?2",
                params![TransferStatus::Done.as_str(), upload_id.to_string()],
            )?;

            if affected == 0 {
                return Err(PartioError::NotFound(format!("upload {}", upload_id)));
            }
            Ok(())
        })
    }

    fn get_upload(&self, upload_id: Ulid) -> Result<Option<Upload>> {
        self.with_connection(|conn| {
            let upload = conn
                .query_row(
                    "SELECT id, name, size, status, created_at FROM uploads WHERE id = ?1",
                    [upload_id.to_string()],
                    upload_from_row,
                )
                .optional()?;
            Ok(upload)
        })
    }

    /// Parts of one upload ordered by number
    fn list_parts(&self, upload_id: Ulid) -> Result<Vec<Part>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM parts WHERE upload_id = ?1 ORDER BY number",
                PART_COLUMNS
            ))?;

            let rows = stmt.query_map([upload_id.to_string()], part_from_row)?;
            collect_rows(rows)
        })
    }

    /// In-progress parts created strictly before `cutoff`
    fn list_stale_parts(&self, cutoff: DateTime<Utc>) -> Result<Vec<Part>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM parts
                 WHERE status = ?1 AND created_at < ?2
                 ORDER BY upload_id, number",
                PART_COLUMNS
            ))?;

            let rows = stmt.query_map(
                params![TransferStatus::InProgress.as_str(), encode_timestamp(&cutoff)],
                part_from_row,
            )?;
            collect_rows(rows)
        })
    }

    /// Every part, in any state, belonging to one of `upload_ids`
    fn list_parts_for_uploads(&self, upload_ids: &[Ulid]) -> Result<Vec<Part>> {
        if upload_ids.is_empty() {
            return Ok(Vec::new());
        }

        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM parts WHERE upload_id IN ({})
                 ORDER BY upload_id, number",
                PART_COLUMNS,
                placeholders(upload_ids.len())
            ))?;

            let rows = stmt.query_map(
                params_from_iter(upload_ids.iter().map(|id| id.to_string())),
                part_from_row,
            )?;
            collect_rows(rows)
        })
    }

    /// Delete uploads in one statement; their parts go with them via cascade.
    /// Returns the number of upload rows removed.
    fn delete_uploads(&self, upload_ids: &[Ulid]) -> Result<usize> {
        if upload_ids.is_empty() {
            return Ok(0);
        }

        self.with_connection(|conn| {
            let affected = conn.execute(
                &format!(
                    "DELETE FROM uploads WHERE id IN ({})",
                    placeholders(upload_ids.len())
                ),
                params_from_iter(upload_ids.iter().map(|id| id.to_string())),
            )?;
            Ok(affected)
        })
    }
}

#[derive(Debug, Clone)]
pub struct MetadataStore {
    database: Database,
}

impl MetadataStore {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Handle bound to an active transaction; `self` stays unbound.
    ///
    /// The returned handle has no `with_tx` of its own, so a transaction-bound
    /// handle can never be rebound.
    pub fn with_tx<'t>(&self, tx: &'t Transaction<'_>) -> TxMetadataStore<'t> {
        TxMetadataStore { conn: tx }
    }
}

impl MetadataQueries for MetadataStore {
    fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.database.connect()?;
        f(&conn)
    }
}

pub struct TxMetadataStore<'t> {
    conn: &'t Connection,
}

impl MetadataQueries for TxMetadataStore<'_> {
    fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        f(self.conn)
    }
}

/// Fixed-width UTC form so text comparison matches time order.
fn encode_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(index)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

fn decode_ulid(row: &Row<'_>, index: usize) -> rusqlite::Result<Ulid> {
    let raw: String = row.get(index)?;
    Ulid::from_string(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

fn decode_status(row: &Row<'_>, index: usize) -> rusqlite::Result<TransferStatus> {
    let raw: String = row.get(index)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

fn upload_from_row(row: &Row<'_>) -> rusqlite::Result<Upload> {
    let size: i64 = row.get(2)?;
    Ok(Upload {
        id: decode_ulid(row, 0)?,
        name: row.get(1)?,
        size: size as u64,
        status: decode_status(row, 3)?,
        created_at: decode_timestamp(row, 4)?,
    })
}

fn part_from_row(row: &Row<'_>) -> rusqlite::Result<Part> {
    let size: i64 = row.get(4)?;
    Ok(Part {
        id: decode_ulid(row, 0)?,
        upload_id: decode_ulid(row, 1)?,
        backend: row.get(2)?,
        number: row.get(3)?,
        size: size as u64,
        status: decode_status(row, 5)?,
        created_at: decode_timestamp(row, 6)?,
    })
}

fn collect_rows<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> Result<Vec<T>> {
    let mut items = Vec::new();
    for row in rows {
        items.push(row?);
    }
    Ok(items)
}

fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|index| format!("?{}", index))
        .collect::<Vec<_>>()
        .join(", ")
}

fn map_insert_error(error: rusqlite::Error, entity: &str, id: &Ulid) -> PartioError {
    let extended_code = match &error {
        rusqlite::Error::SqliteFailure(failure, _) => Some(failure.extended_code),
        _ => None,
    };

    match extended_code {
        Some(ffi::SQLITE_CONSTRAINT_PRIMARYKEY) | Some(ffi::SQLITE_CONSTRAINT_UNIQUE) => {
            PartioError::Conflict(format!("{} {} already exists", entity, id))
        }
        Some(ffi::SQLITE_CONSTRAINT_FOREIGNKEY) => {
            PartioError::NotFound(format!("owning upload of {} {}", entity, id))
        }
        _ => PartioError::Database(error),
    }
}
