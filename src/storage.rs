use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Durable home for alert records.
///
/// The pipeline only ever calls `save`, from the persistence worker. The read helpers serve the
/// front door and the export tool.
pub trait AlertStore: Send {
    fn save(&mut self, timestamp: SystemTime, distance_m: f64, image: &[u8]) -> Result<i64>;

    /// Most recent records first, image bytes omitted.
    fn recent(&mut self, limit: usize) -> Result<Vec<StoredAlert>>;

    fn image(&mut self, id: i64) -> Result<Option<Vec<u8>>>;
}

/// One persisted alert, without its image payload.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StoredAlert {
    pub id: i64,
    /// Milliseconds since the Unix epoch.
    pub created_at_ms: i64,
    pub distance_m: f64,
    pub image_len: usize,
}

impl StoredAlert {
    pub fn created_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.created_at_ms.max(0) as u64)
    }
}

pub(crate) fn epoch_ms(timestamp: SystemTime) -> Result<i64> {
    let ms = timestamp
        .duration_since(UNIX_EPOCH)
        .map_err(|_| anyhow!("alert timestamp precedes the Unix epoch"))?
        .as_millis();
    i64::try_from(ms).map_err(|_| anyhow!("alert timestamp exceeds i64 range"))
}

pub struct SqliteAlertStore {
    conn: Connection,
}

impl SqliteAlertStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS motion_alerts (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              created_at_ms INTEGER NOT NULL,
              distance_m REAL NOT NULL,
              image BLOB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_alerts_created ON motion_alerts(created_at_ms);
            "#,
        )?;
        Ok(())
    }
}

impl AlertStore for SqliteAlertStore {
    fn save(&mut self, timestamp: SystemTime, distance_m: f64, image: &[u8]) -> Result<i64> {
        let created_at_ms = epoch_ms(timestamp)?;
        self.conn.execute(
            "INSERT INTO motion_alerts(created_at_ms, distance_m, image) VALUES (?1, ?2, ?3)",
            params![created_at_ms, distance_m, image],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn recent(&mut self, limit: usize) -> Result<Vec<StoredAlert>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, created_at_ms, distance_m, length(image)
            FROM motion_alerts ORDER BY id DESC LIMIT ?1
            "#,
        )?;
        let mut rows = stmt.query(params![limit as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let image_len: i64 = row.get(3)?;
            out.push(StoredAlert {
                id: row.get(0)?,
                created_at_ms: row.get(1)?,
                distance_m: row.get(2)?,
                image_len: image_len.max(0) as usize,
            });
        }
        Ok(out)
    }

    fn image(&mut self, id: i64) -> Result<Option<Vec<u8>>> {
        let image = self
            .conn
            .query_row(
                "SELECT image FROM motion_alerts WHERE id = ?1",
                params![id],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(image)
    }
}

#[derive(Clone, Debug)]
struct InMemoryAlertEntry {
    alert: StoredAlert,
    image: Vec<u8>,
}

/// In-memory store. Clones share the same records, so a caller can keep a handle while the
/// persistence worker owns another.
#[derive(Clone, Debug, Default)]
pub struct InMemoryAlertStore {
    entries: Arc<Mutex<Vec<InMemoryAlertEntry>>>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AlertStore for InMemoryAlertStore {
    fn save(&mut self, timestamp: SystemTime, distance_m: f64, image: &[u8]) -> Result<i64> {
        let created_at_ms = epoch_ms(timestamp)?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("alert store lock poisoned"))?;
        let id = entries.len() as i64 + 1;
        entries.push(InMemoryAlertEntry {
            alert: StoredAlert {
                id,
                created_at_ms,
                distance_m,
                image_len: image.len(),
            },
            image: image.to_vec(),
        });
        Ok(id)
    }

    fn recent(&mut self, limit: usize) -> Result<Vec<StoredAlert>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("alert store lock poisoned"))?;
        Ok(entries
            .iter()
            .rev()
            .take(limit)
            .map(|entry| entry.alert.clone())
            .collect())
    }

    fn image(&mut self, id: i64) -> Result<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("alert store lock poisoned"))?;
        Ok(entries
            .iter()
            .find(|entry| entry.alert.id == id)
            .map(|entry| entry.image.clone()))
    }
}
