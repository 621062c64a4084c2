//! SQLite persistence for waterbodies and their observations.
//!
//! Upserts first look up which incoming keys already exist, then apply the
//! updates in one transaction and the inserts in another.

use chrono::NaiveDate;
use geo::Polygon;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;
use wkt::{ToWkt, TryFromWkt};

use crate::error::{Error, Result};
use crate::historical_extent::WaterbodyPolygon;
use crate::surface_area_change::WaterbodyObservation;

/// Environment variable naming the database file
pub const DATABASE_ENV: &str = "WATERBODIES_DB";

const DATE_FORMAT: &str = "%Y-%m-%d";
const WGS84_SRID: u32 = 4326;

/// Row counts of one upsert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// Storage of the historical extent and the observation time series.
pub trait WaterbodyStore {
    /// Insert new waterbodies; existing uids are updated when `update_rows`,
    /// skipped otherwise.
    fn upsert_waterbodies(&mut self, waterbodies: &[WaterbodyPolygon], update_rows: bool) -> Result<UpsertSummary>;

    /// Insert new observations; existing obs_ids are updated when
    /// `update_rows`, skipped otherwise.
    fn upsert_observations(
        &mut self,
        observations: &[WaterbodyObservation],
        update_rows: bool,
    ) -> Result<UpsertSummary>;

    /// Whether any observation belongs to `task_id`
    fn task_exists(&self, task_id: &str) -> Result<bool>;

    /// Date of the most recent observation
    fn last_observation_date(&self) -> Result<Option<NaiveDate>>;

    /// All waterbodies, by wb_id
    fn load_waterbodies(&self) -> Result<Vec<WaterbodyPolygon>>;

    /// Observations of one task, by uid
    fn load_observations(&self, task_id: &str) -> Result<Vec<WaterbodyObservation>>;
}

/// `SRID=4326;POLYGON(...)`
pub fn to_ewkt(polygon: &Polygon<f64>) -> String {
    format!("SRID={};{}", WGS84_SRID, polygon.wkt_string())
}

/// Parse EWKT or plain WKT into a polygon.
pub fn from_ewkt(text: &str) -> Result<Polygon<f64>> {
    let body = match text.strip_prefix("SRID=") {
        Some(rest) => {
            let (srid, body) = rest
                .split_once(';')
                .ok_or_else(|| Error::Wkt(format!("malformed EWKT '{}'", text)))?;
            if srid != WGS84_SRID.to_string() {
                return Err(Error::Wkt(format!("unexpected SRID {}", srid)));
            }
            body
        }
        None => text,
    };
    Polygon::try_from_wkt_str(body).map_err(|e| Error::Wkt(e.to_string()))
}

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self { conn: Connection::open(path)? };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self { conn: Connection::open_in_memory()? };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS waterbodies_historical_extent (
              uid TEXT PRIMARY KEY,
              wb_id INTEGER NOT NULL,
              area_m2 REAL NOT NULL,
              length_m REAL NOT NULL,
              perim_m REAL NOT NULL,
              geometry TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS waterbodies_observations (
              obs_id TEXT PRIMARY KEY,
              uid TEXT NOT NULL REFERENCES waterbodies_historical_extent(uid),
              date TEXT NOT NULL,
              task_id TEXT NOT NULL,
              px_total INTEGER NOT NULL,
              px_wet INTEGER NOT NULL,
              area_wet_m2 REAL NOT NULL,
              px_dry INTEGER NOT NULL,
              area_dry_m2 REAL NOT NULL,
              px_invalid INTEGER NOT NULL,
              area_invalid_m2 REAL NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_observations_uid ON waterbodies_observations(uid);
            CREATE INDEX IF NOT EXISTS idx_observations_task_id ON waterbodies_observations(task_id);
            "#,
        )?;
        Ok(())
    }

    fn existing_keys<'a>(&self, sql: &str, keys: impl Iterator<Item = &'a str>) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut existing = HashSet::new();
        for key in keys {
            if stmt.query_row(params![key], |_| Ok(())).optional()?.is_some() {
                existing.insert(key.to_string());
            }
        }
        Ok(existing)
    }

    /// Run `write` over `rows` inside one transaction.
    fn write_all<T>(
        &mut self,
        rows: &[&T],
        write: impl Fn(&Transaction<'_>, &T) -> rusqlite::Result<usize>,
    ) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        for row in rows {
            write(&tx, row)?;
        }
        tx.commit()?;
        Ok(())
    }
}

fn insert_waterbody_tx(tx: &Transaction<'_>, w: &WaterbodyPolygon) -> rusqlite::Result<usize> {
    tx.execute(
        r#"
        INSERT INTO waterbodies_historical_extent(uid,wb_id,area_m2,length_m,perim_m,geometry)
        VALUES (?1,?2,?3,?4,?5,?6)
        "#,
        params![w.uid, w.wb_id, w.area_m2, w.length_m, w.perim_m, to_ewkt(&w.geometry)],
    )
}

fn update_waterbody_tx(tx: &Transaction<'_>, w: &WaterbodyPolygon) -> rusqlite::Result<usize> {
    tx.execute(
        r#"
        UPDATE waterbodies_historical_extent
        SET wb_id = ?2, area_m2 = ?3, length_m = ?4, perim_m = ?5, geometry = ?6
        WHERE uid = ?1
        "#,
        params![w.uid, w.wb_id, w.area_m2, w.length_m, w.perim_m, to_ewkt(&w.geometry)],
    )
}

fn insert_observation_tx(tx: &Transaction<'_>, o: &WaterbodyObservation) -> rusqlite::Result<usize> {
    tx.execute(
        r#"
        INSERT INTO waterbodies_observations(
          obs_id,uid,date,task_id,px_total,px_wet,area_wet_m2,px_dry,area_dry_m2,px_invalid,area_invalid_m2
        )
        VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
        "#,
        params![
            o.obs_id,
            o.uid,
            o.date.format(DATE_FORMAT).to_string(),
            o.task_id,
            o.px_total,
            o.px_wet,
            o.area_wet_m2,
            o.px_dry,
            o.area_dry_m2,
            o.px_invalid,
            o.area_invalid_m2
        ],
    )
}

fn update_observation_tx(tx: &Transaction<'_>, o: &WaterbodyObservation) -> rusqlite::Result<usize> {
    tx.execute(
        r#"
        UPDATE waterbodies_observations
        SET uid = ?2, date = ?3, task_id = ?4, px_total = ?5, px_wet = ?6, area_wet_m2 = ?7,
            px_dry = ?8, area_dry_m2 = ?9, px_invalid = ?10, area_invalid_m2 = ?11
        WHERE obs_id = ?1
        "#,
        params![
            o.obs_id,
            o.uid,
            o.date.format(DATE_FORMAT).to_string(),
            o.task_id,
            o.px_total,
            o.px_wet,
            o.area_wet_m2,
            o.px_dry,
            o.area_dry_m2,
            o.px_invalid,
            o.area_invalid_m2
        ],
    )
}

fn parse_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .map_err(|e| Error::InvariantViolation(format!("stored date '{}': {}", text, e)))
}

impl WaterbodyStore for SqliteStore {
    fn upsert_waterbodies(&mut self, waterbodies: &[WaterbodyPolygon], update_rows: bool) -> Result<UpsertSummary> {
        let existing = self.existing_keys(
            "SELECT 1 FROM waterbodies_historical_extent WHERE uid = ?1",
            waterbodies.iter().map(|w| w.uid.as_str()),
        )?;
        info!(
            "Found {} out of {} waterbodies already in waterbodies_historical_extent",
            existing.len(),
            waterbodies.len()
        );
        let (updates, inserts): (Vec<&WaterbodyPolygon>, Vec<&WaterbodyPolygon>) =
            waterbodies.iter().partition(|w| existing.contains(&w.uid));

        let mut summary = UpsertSummary { inserted: inserts.len(), ..Default::default() };
        if update_rows {
            self.write_all(&updates, update_waterbody_tx)?;
            summary.updated = updates.len();
        } else {
            summary.skipped = updates.len();
        }
        self.write_all(&inserts, insert_waterbody_tx)?;
        info!(
            "Waterbodies: {} inserted, {} updated, {} skipped",
            summary.inserted, summary.updated, summary.skipped
        );
        Ok(summary)
    }

    fn upsert_observations(
        &mut self,
        observations: &[WaterbodyObservation],
        update_rows: bool,
    ) -> Result<UpsertSummary> {
        let existing = self.existing_keys(
            "SELECT 1 FROM waterbodies_observations WHERE obs_id = ?1",
            observations.iter().map(|o| o.obs_id.as_str()),
        )?;
        info!(
            "Found {} out of {} observations already in waterbodies_observations",
            existing.len(),
            observations.len()
        );
        let (updates, inserts): (Vec<&WaterbodyObservation>, Vec<&WaterbodyObservation>) =
            observations.iter().partition(|o| existing.contains(&o.obs_id));

        let mut summary = UpsertSummary { inserted: inserts.len(), ..Default::default() };
        if update_rows {
            self.write_all(&updates, update_observation_tx)?;
            summary.updated = updates.len();
        } else {
            summary.skipped = updates.len();
        }
        self.write_all(&inserts, insert_observation_tx)?;
        info!(
            "Observations: {} inserted, {} updated, {} skipped",
            summary.inserted, summary.updated, summary.skipped
        );
        Ok(summary)
    }

    fn task_exists(&self, task_id: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM waterbodies_observations WHERE task_id = ?1 LIMIT 1",
                params![task_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn last_observation_date(&self) -> Result<Option<NaiveDate>> {
        let last: Option<String> = self.conn.query_row(
            "SELECT MAX(date) FROM waterbodies_observations",
            [],
            |row| row.get(0),
        )?;
        last.as_deref().map(parse_date).transpose()
    }

    fn load_waterbodies(&self) -> Result<Vec<WaterbodyPolygon>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT uid, wb_id, area_m2, length_m, perim_m, geometry
            FROM waterbodies_historical_extent
            ORDER BY wb_id
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i32>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut waterbodies = Vec::new();
        for row in rows {
            let (uid, wb_id, area_m2, length_m, perim_m, geometry) = row?;
            waterbodies.push(WaterbodyPolygon {
                uid,
                wb_id,
                geometry: from_ewkt(&geometry)?,
                area_m2,
                length_m,
                perim_m,
            });
        }
        Ok(waterbodies)
    }

    fn load_observations(&self, task_id: &str) -> Result<Vec<WaterbodyObservation>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT obs_id, task_id, uid, date, px_total, px_wet, area_wet_m2,
                   px_dry, area_dry_m2, px_invalid, area_invalid_m2
            FROM waterbodies_observations
            WHERE task_id = ?1
            ORDER BY uid
            "#,
        )?;
        let rows = stmt.query_map(params![task_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                [row.get::<_, i64>(4)?, row.get::<_, i64>(5)?, row.get::<_, i64>(7)?, row.get::<_, i64>(9)?],
                [row.get::<_, f64>(6)?, row.get::<_, f64>(8)?, row.get::<_, f64>(10)?],
            ))
        })?;

        let mut observations = Vec::new();
        for row in rows {
            let (obs_id, task_id, uid, date, [px_total, px_wet, px_dry, px_invalid], [area_wet_m2, area_dry_m2, area_invalid_m2]) =
                row?;
            observations.push(WaterbodyObservation {
                obs_id,
                task_id,
                uid,
                date: parse_date(&date)?,
                px_total,
                px_wet,
                area_wet_m2,
                px_dry,
                area_dry_m2,
                px_invalid,
                area_invalid_m2,
            });
        }
        Ok(observations)
    }
}
