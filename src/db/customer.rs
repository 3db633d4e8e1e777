//! Customer repository backed by `SQLite`

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use super::DbPool;
use crate::customer::{IdentityRecord, TurnRecord};
use crate::store::CustomerStore;
use crate::{Error, Result};

/// Customer repository
#[derive(Clone)]
pub struct CustomerRepo {
    pool: DbPool,
}

impl CustomerRepo {
    /// Create a new customer repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<super::DbConn> {
        self.pool.get().map_err(|e| Error::Database(e.to_string()))
    }

    /// Count stored customers
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM customers", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn load_turns(conn: &rusqlite::Connection, customer_id: &str) -> Result<Vec<TurnRecord>> {
        let mut stmt = conn.prepare(
            "SELECT user_text, assistant_text, created_at FROM turns
             WHERE customer_id = ?1 ORDER BY seq ASC",
        )?;

        let turns = stmt
            .query_map([customer_id], |row| {
                Ok(TurnRecord {
                    user_text: row.get(0)?,
                    assistant_text: row.get(1)?,
                    timestamp: parse_datetime(&row.get::<_, String>(2)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(turns)
    }
}

impl CustomerStore for CustomerRepo {
    fn load_all(&self) -> Result<Vec<IdentityRecord>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, descriptor, last_seen_at FROM customers ORDER BY position ASC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for (id, blob, last_seen) in rows {
            let conversations = Self::load_turns(&conn, &id)?;
            records.push(IdentityRecord::from_parts(
                id,
                decode_descriptor(&blob)?,
                parse_datetime(&last_seen),
                conversations,
            ));
        }

        Ok(records)
    }

    fn save_all(&self, records: &[IdentityRecord]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM turns", [])?;
        tx.execute("DELETE FROM customers", [])?;

        for (position, record) in records.iter().enumerate() {
            tx.execute(
                "INSERT INTO customers (id, position, descriptor, descriptor_len, last_seen_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id(),
                    i64::try_from(position).unwrap_or(i64::MAX),
                    encode_descriptor(record.descriptor()),
                    i64::try_from(record.descriptor().len()).unwrap_or_default(),
                    record.last_seen_at().to_rfc3339(),
                ],
            )?;

            for (seq, turn) in record.conversations().iter().enumerate() {
                tx.execute(
                    "INSERT INTO turns (customer_id, seq, user_text, assistant_text, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        record.id(),
                        i64::try_from(seq).unwrap_or(i64::MAX),
                        turn.user_text,
                        turn.assistant_text,
                        turn.timestamp.to_rfc3339(),
                    ],
                )?;
            }
        }

        tx.commit()?;
        tracing::debug!(count = records.len(), "customers saved");
        Ok(())
    }

    fn append_turn(&self, id: &str, turn: TurnRecord) -> Result<()> {
        let conn = self.conn()?;

        let exists = conn
            .query_row("SELECT 1 FROM customers WHERE id = ?1", [id], |_| Ok(()))
            .optional()?
            .is_some();
        if !exists {
            return Err(Error::Database(format!("unknown customer: {id}")));
        }

        conn.execute(
            "INSERT INTO turns (customer_id, seq, user_text, assistant_text, created_at)
             VALUES (?1, (SELECT COALESCE(MAX(seq) + 1, 0) FROM turns WHERE customer_id = ?1), ?2, ?3, ?4)",
            params![id, turn.user_text, turn.assistant_text, turn.timestamp.to_rfc3339()],
        )?;

        tracing::debug!(customer = id, "turn recorded");
        Ok(())
    }
}

/// Serialize a descriptor as little-endian `f32` bytes (lossless)
#[must_use]
pub fn encode_descriptor(descriptor: &[f32]) -> Vec<u8> {
    descriptor.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Deserialize a descriptor written by [`encode_descriptor`]
///
/// # Errors
///
/// Returns error if the blob length is not a multiple of 4
pub fn decode_descriptor(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(Error::Database(format!(
            "descriptor blob has invalid length {}",
            blob.len()
        )));
    }

    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
