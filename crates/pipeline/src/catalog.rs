//! Dataset catalog: searchable records of the scenes and summaries the
//! pipelines consume.

use chrono::{DateTime, Utc};
use geo::{LineString, Polygon};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use waterbodies_core::CRS;
use waterbodies_core::crs::reproject_point;

use crate::error::{Error, Result};
use crate::temporal::TemporalRange;

/// Multi-year water frequency summary product
pub const HISTORICAL_EXTENT_PRODUCT: &str = "wofs_ls_summary_alltime";
/// Per-scene water classification product
pub const WATER_OBSERVATIONS_PRODUCT: &str = "wofs_ls";

/// Dataset footprint: a ring of vertices in the CRS given by `epsg`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    pub epsg: u32,
    pub coordinates: Vec<[f64; 2]>,
}

impl Footprint {
    pub fn is_empty(&self) -> bool {
        self.coordinates.len() < 3
    }

    /// Footprint polygon reprojected into `target`, vertex by vertex.
    pub fn to_polygon(&self, target: &CRS) -> Result<Polygon<f64>> {
        let source = CRS::from_epsg(self.epsg);
        let ring = self
            .coordinates
            .iter()
            .map(|&[x, y]| reproject_point(&source, target, x, y))
            .collect::<waterbodies_core::Result<Vec<(f64, f64)>>>()?;
        Ok(Polygon::new(LineString::from(ring), vec![]))
    }
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: String,
    pub product: String,
    pub acquisition_time: DateTime<Utc>,
    pub creation_time: DateTime<Utc>,
    #[serde(default)]
    pub footprint: Option<Footprint>,
    /// Measurement name to GeoTIFF path
    #[serde(default)]
    pub measurements: HashMap<String, PathBuf>,
}

impl DatasetRecord {
    pub fn measurement_path(&self, name: &str) -> Result<&Path> {
        self.measurements.get(name).map(PathBuf::as_path).ok_or_else(|| {
            Error::NotFound(format!("measurement '{}' of dataset {}", name, self.id))
        })
    }
}

/// Which timestamp a time filter applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeField {
    Acquisition,
    Creation,
}

#[derive(Debug, Clone, Copy)]
pub struct TimeFilter {
    pub field: TimeField,
    pub range: TemporalRange,
}

impl TimeFilter {
    pub fn acquired(range: TemporalRange) -> Self {
        Self { field: TimeField::Acquisition, range }
    }

    pub fn created(range: TemporalRange) -> Self {
        Self { field: TimeField::Creation, range }
    }

    fn matches(&self, record: &DatasetRecord) -> bool {
        let t = match self.field {
            TimeField::Acquisition => record.acquisition_time,
            TimeField::Creation => record.creation_time,
        };
        self.range.contains(t)
    }
}

/// A searchable dataset catalog
pub trait Catalog {
    /// Datasets of `product`, optionally restricted by a time filter
    fn search(&self, product: &str, filter: Option<TimeFilter>) -> Result<Vec<DatasetRecord>>;

    /// Datasets by id, in the order requested. A missing id is an error.
    fn get(&self, ids: &[String]) -> Result<Vec<DatasetRecord>>;
}

/// Catalog backed by a JSON array of [`DatasetRecord`]s.
///
/// Relative measurement paths are resolved against the catalog file's
/// directory.
#[derive(Debug, Clone, Default)]
pub struct JsonCatalog {
    records: Vec<DatasetRecord>,
    by_id: HashMap<String, usize>,
}

impl JsonCatalog {
    pub fn from_records(records: Vec<DatasetRecord>) -> Self {
        let by_id = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();
        Self { records, by_id }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Catalog(format!("cannot read {}: {}", path.display(), e)))?;
        let mut records: Vec<DatasetRecord> = serde_json::from_str(&text)?;
        if let Some(base) = path.parent() {
            for record in &mut records {
                for measurement in record.measurements.values_mut() {
                    if measurement.is_relative() {
                        *measurement = base.join(&*measurement);
                    }
                }
            }
        }
        tracing::debug!("Loaded {} dataset records from {}", records.len(), path.display());
        Ok(Self::from_records(records))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Catalog for JsonCatalog {
    fn search(&self, product: &str, filter: Option<TimeFilter>) -> Result<Vec<DatasetRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.product == product)
            .filter(|r| filter.is_none_or(|f| f.matches(r)))
            .cloned()
            .collect())
    }

    fn get(&self, ids: &[String]) -> Result<Vec<DatasetRecord>> {
        ids.iter()
            .map(|id| {
                self.by_id
                    .get(id)
                    .map(|&i| self.records[i].clone())
                    .ok_or_else(|| Error::NotFound(format!("dataset {}", id)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: &str, product: &str, acquired: (i32, u32, u32), created: (i32, u32, u32)) -> DatasetRecord {
        DatasetRecord {
            id: id.to_string(),
            product: product.to_string(),
            acquisition_time: Utc.with_ymd_and_hms(acquired.0, acquired.1, acquired.2, 8, 0, 0).unwrap(),
            creation_time: Utc.with_ymd_and_hms(created.0, created.1, created.2, 0, 0, 0).unwrap(),
            footprint: None,
            measurements: HashMap::new(),
        }
    }

    #[test]
    fn test_search_by_product_and_time() {
        let catalog = JsonCatalog::from_records(vec![
            record("a", WATER_OBSERVATIONS_PRODUCT, (2016, 4, 5), (2020, 1, 1)),
            record("b", WATER_OBSERVATIONS_PRODUCT, (2016, 4, 6), (2023, 3, 1)),
            record("c", HISTORICAL_EXTENT_PRODUCT, (2016, 4, 5), (2020, 1, 1)),
        ]);

        let all = catalog.search(WATER_OBSERVATIONS_PRODUCT, None).unwrap();
        assert_eq!(all.len(), 2);

        let range: TemporalRange = "2016-04-05--P1D".parse().unwrap();
        let acquired = catalog
            .search(WATER_OBSERVATIONS_PRODUCT, Some(TimeFilter::acquired(range)))
            .unwrap();
        assert_eq!(acquired.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["a"]);

        let range: TemporalRange = "2023-03--P1M".parse().unwrap();
        let created = catalog
            .search(WATER_OBSERVATIONS_PRODUCT, Some(TimeFilter::created(range)))
            .unwrap();
        assert_eq!(created.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_get_by_id() {
        let catalog = JsonCatalog::from_records(vec![
            record("a", WATER_OBSERVATIONS_PRODUCT, (2016, 4, 5), (2020, 1, 1)),
            record("b", WATER_OBSERVATIONS_PRODUCT, (2016, 4, 6), (2020, 1, 1)),
        ]);
        let found = catalog.get(&["b".to_string(), "a".to_string()]).unwrap();
        assert_eq!(found[0].id, "b");
        assert!(matches!(catalog.get(&["zzz".to_string()]), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_open_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let json = r#"[{
            "id": "a",
            "product": "wofs_ls",
            "acquisition_time": "2016-04-05T08:30:00Z",
            "creation_time": "2020-01-01T00:00:00Z",
            "footprint": {"epsg": 4326, "coordinates": [[18.0, -32.0], [18.5, -32.0], [18.5, -32.5], [18.0, -32.0]]},
            "measurements": {"water": "scenes/a_water.tif"}
        }]"#;
        std::fs::write(&path, json).unwrap();

        let catalog = JsonCatalog::open(&path).unwrap();
        assert_eq!(catalog.len(), 1);
        let record = &catalog.get(&["a".to_string()]).unwrap()[0];
        assert_eq!(
            record.measurement_path("water").unwrap(),
            dir.path().join("scenes/a_water.tif")
        );
        assert!(record.measurement_path("frequency").is_err());
    }

    #[test]
    fn test_footprint_to_grid_crs() {
        let footprint = Footprint {
            epsg: 4326,
            coordinates: vec![[18.0, -32.5], [19.0, -32.5], [19.0, -33.0], [18.0, -32.5]],
        };
        let polygon = footprint.to_polygon(&CRS::ease_grid_global()).unwrap();
        let first = polygon.exterior().0[0];
        approx::assert_relative_eq!(first.x, 1_736_753.04, epsilon = 1.0);

        let unsupported = Footprint { epsg: 3577, ..footprint };
        assert!(unsupported.to_polygon(&CRS::ease_grid_global()).is_err());
    }
}
