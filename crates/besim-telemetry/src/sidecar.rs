//! Append-only SQLite persistence for the simulator's telemetry.
//!
//! Grounded on `original_source/besim/rootfs/opt/BeSIM/database.py`
//! (table DDL, `PRAGMA user_version` versioning, purge-by-timestamp)
//! ported through `services/forwarder/src/storage/journal.rs`'s
//! rusqlite wrapper shape (pragmas applied at open, hand-rolled error
//! enum with a `From<rusqlite::Error>` impl).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

/// `database.py`'s `Database.VERSION`.
pub const SCHEMA_VERSION: i64 = 7;

#[derive(Debug)]
pub enum TelemetryError {
    Sqlite(rusqlite::Error),
    SchemaVersionMismatch { found: i64, expected: i64 },
}

impl std::fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TelemetryError::Sqlite(e) => write!(f, "sqlite error: {e}"),
            TelemetryError::SchemaVersionMismatch { found, expected } => write!(
                f,
                "database needs upgrading from version {found} to {expected}; migration not implemented, refusing to start"
            ),
        }
    }
}

impl std::error::Error for TelemetryError {}

impl From<rusqlite::Error> for TelemetryError {
    fn from(e: rusqlite::Error) -> Self {
        TelemetryError::Sqlite(e)
    }
}

/// A best-effort, non-durable telemetry sink. Every public method
/// swallows its own SQLite errors into a `tracing::warn!` and returns
/// normally: a logging failure should never take down the engine —
/// except [`Sidecar::open`] itself, where a schema mismatch is fatal
/// at startup.
pub struct Sidecar {
    conn: Mutex<Connection>,
}

impl Sidecar {
    /// Opens (or creates) the sqlite file at `path`, applying the same
    /// pragmas `journal.rs` applies at open, then checks/initializes
    /// the schema version.
    pub fn open(path: &str) -> Result<Sidecar, TelemetryError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let sidecar = Sidecar { conn: Mutex::new(conn) };
        sidecar.check_or_init_schema()?;
        Ok(sidecar)
    }

    fn check_or_init_schema(&self) -> Result<(), TelemetryError> {
        let conn = self.conn.lock();
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version == 0 {
            tracing::warn!(to = SCHEMA_VERSION, "initializing telemetry database");
            create_tables(&conn)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        } else if version != SCHEMA_VERSION {
            return Err(TelemetryError::SchemaVersionMismatch { found: version, expected: SCHEMA_VERSION });
        }
        Ok(())
    }

    pub fn log_outside_temperature(&self, temp: f64) {
        self.try_insert("besim_outside_temperature", || {
            let conn = self.conn.lock();
            conn.execute(
                "insert into besim_outside_temperature(ts, temp) values (?1, ?2)",
                params![now_iso(), temp],
            )
        });
    }

    /// The most recently logged outside-temperature reading, if any.
    pub fn latest_outside_temperature(&self) -> Option<f64> {
        let conn = self.conn.lock();
        conn.query_row(
            "select temp from besim_outside_temperature order by ts desc limit 1",
            [],
            |row| row.get(0),
        )
        .ok()
    }

    pub fn log_temperature(&self, thermostat: &str, temp: f64, settemp: f64, heating: bool) {
        self.try_insert("besim_temperature", || {
            let conn = self.conn.lock();
            conn.execute(
                "insert into besim_temperature(ts, thermostat, temp, settemp, heating) values (?1, ?2, ?3, ?4, ?5)",
                params![now_iso(), thermostat, temp, settemp, heating],
            )
        });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_trace(&self, source: &str, host: &str, adapter_map: &str, uri: &str, elapsed_ms: i64, response_status: &str) {
        self.try_insert("web_traces", || {
            let conn = self.conn.lock();
            conn.execute(
                "insert into web_traces(ts, source, adapterMap, host, uri, elapsed, response_status) values (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![now_iso(), source, adapter_map, host, uri, elapsed_ms, response_status],
            )
        });
    }

    pub fn log_unknown_udp(&self, source: &str, msg_type: &str, code: i64, raw_data: &[u8], payload: &[u8], unparsed_payload: &[u8]) {
        self.try_insert("unknown_udp", || {
            let conn = self.conn.lock();
            conn.execute(
                "insert into unknown_udp(ts, source, type, code, payload, unparsed_payload, raw_data) values (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![now_iso(), source, msg_type, code, payload, unparsed_payload, raw_data],
            )
        });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_unknown_api(
        &self,
        source: &str,
        host: &str,
        method: &str,
        uri: &str,
        headers: &str,
        body: &[u8],
        rm_resp_code: &str,
        rm_res_body: &str,
    ) {
        self.try_insert("unknown_api", || {
            let conn = self.conn.lock();
            conn.execute(
                "insert into unknown_api(ts, source, host, method, uri, headers, body, rm_resp_code, rm_res_body) values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![now_iso(), source, host, method, uri, headers, body, rm_resp_code, rm_res_body],
            )
        });
    }

    /// Rows from `besim_temperature` for one thermostat within
    /// `[from, to]` (RFC3339 strings), newest last. Used by the REST
    /// surface's per-room history endpoint.
    pub fn query_temperature_history(&self, thermostat: &str, from: &str, to: &str) -> Vec<serde_json::Value> {
        self.query_rows(
            "select ts, temp, settemp, heating from besim_temperature \
             where thermostat = ?1 and ts >= ?2 and ts <= ?3 order by ts asc",
            params![thermostat, from, to],
            |row| {
                let heating: bool = row.get(3)?;
                Ok(serde_json::json!({
                    "ts": row.get::<_, String>(0)?,
                    "temp": row.get::<_, f64>(1)?,
                    "settemp": row.get::<_, f64>(2)?,
                    "heating": heating,
                }))
            },
        )
    }

    /// Rows from `besim_outside_temperature` within `[from, to]`.
    pub fn query_outside_temperature_history(&self, from: &str, to: &str) -> Vec<serde_json::Value> {
        self.query_rows(
            "select ts, temp from besim_outside_temperature where ts >= ?1 and ts <= ?2 order by ts asc",
            params![from, to],
            |row| {
                Ok(serde_json::json!({
                    "ts": row.get::<_, String>(0)?,
                    "temp": row.get::<_, f64>(1)?,
                }))
            },
        )
    }

    /// Most recent `limit` rows from `web_traces`, newest first.
    pub fn query_web_traces(&self, limit: i64) -> Vec<serde_json::Value> {
        self.query_rows(
            "select ts, source, adapterMap, host, uri, elapsed, response_status \
             from web_traces order by ts desc limit ?1",
            params![limit],
            |row| {
                Ok(serde_json::json!({
                    "ts": row.get::<_, String>(0)?,
                    "source": row.get::<_, String>(1)?,
                    "adapterMap": row.get::<_, String>(2)?,
                    "host": row.get::<_, String>(3)?,
                    "uri": row.get::<_, String>(4)?,
                    "elapsed": row.get::<_, i64>(5)?,
                    "response_status": row.get::<_, String>(6)?,
                }))
            },
        )
    }

    /// Most recent `limit` rows from `unknown_udp`, newest first.
    pub fn query_unknown_udp(&self, limit: i64) -> Vec<serde_json::Value> {
        self.query_rows(
            "select ts, source, type, code, raw_data from unknown_udp order by ts desc limit ?1",
            params![limit],
            |row| {
                Ok(serde_json::json!({
                    "ts": row.get::<_, String>(0)?,
                    "source": row.get::<_, String>(1)?,
                    "type": row.get::<_, String>(2)?,
                    "code": row.get::<_, i64>(3)?,
                    "raw_data": to_hex(&row.get::<_, Vec<u8>>(4)?),
                }))
            },
        )
    }

    /// Most recent `limit` rows from `unknown_api`, newest first.
    pub fn query_unknown_api(&self, limit: i64) -> Vec<serde_json::Value> {
        self.query_rows(
            "select ts, source, host, method, uri, rm_resp_code from unknown_api order by ts desc limit ?1",
            params![limit],
            |row| {
                Ok(serde_json::json!({
                    "ts": row.get::<_, String>(0)?,
                    "source": row.get::<_, String>(1)?,
                    "host": row.get::<_, String>(2)?,
                    "method": row.get::<_, String>(3)?,
                    "uri": row.get::<_, String>(4)?,
                    "rm_resp_code": row.get::<_, String>(5)?,
                }))
            },
        )
    }

    fn query_rows(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        row_to_json: impl Fn(&rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value>,
    ) -> Vec<serde_json::Value> {
        let conn = self.conn.lock();
        let mut stmt = match conn.prepare(sql) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "telemetry query failed to prepare");
                return Vec::new();
            }
        };
        let rows = match stmt.query_map(params, row_to_json) {
            Ok(iter) => iter.collect::<rusqlite::Result<Vec<serde_json::Value>>>(),
            Err(e) => Err(e),
        };
        match rows {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "telemetry query failed");
                Vec::new()
            }
        }
    }

    /// Deletes rows older than `days_to_keep` from all five tables,
    /// relative to one `now` snapshot, matching `database.py`'s `purge`.
    pub fn purge(&self, days_to_keep: i64) {
        let limit = (Utc::now() - ChronoDuration::days(days_to_keep)).to_rfc3339();
        let conn = self.conn.lock();
        for table in [
            "besim_outside_temperature",
            "besim_temperature",
            "web_traces",
            "unknown_udp",
            "unknown_api",
        ] {
            let sql = format!("delete from {table} where ts < ?1");
            if let Err(e) = conn.execute(&sql, params![limit]) {
                tracing::warn!(table, error = %e, "telemetry purge failed");
            }
        }
    }

    fn try_insert(&self, table: &str, f: impl FnOnce() -> rusqlite::Result<usize>) {
        if let Err(e) = f() {
            tracing::warn!(table, error = %e, "telemetry insert failed, dropping record");
        }
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn now_iso() -> String {
    let now: DateTime<Utc> = Utc::now();
    now.to_rfc3339()
}

fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "create table if not exists besim_outside_temperature(ts DATETIME, temp NUMERIC)",
        [],
    )?;
    conn.execute(
        "create table if not exists besim_temperature(ts DATETIME, thermostat TEXT, temp NUMERIC, settemp NUMERIC, heating NUMERIC)",
        [],
    )?;
    conn.execute(
        "create table if not exists web_traces(ts DATETIME, source TEXT, adapterMap TEXT, host TEXT, uri TEXT, elapsed NUMERIC, response_status TEXT)",
        [],
    )?;
    conn.execute(
        "create table if not exists unknown_udp(ts DATETIME, source TEXT, type TEXT, code NUMERIC, payload BLOB, unparsed_payload BLOB, raw_data BLOB)",
        [],
    )?;
    conn.execute(
        "create table if not exists unknown_api(ts DATETIME, source TEXT, host TEXT, method TEXT, uri TEXT, headers TEXT, body BLOB, rm_resp_code TEXT, rm_res_body TEXT)",
        [],
    )?;
    Ok(())
}
