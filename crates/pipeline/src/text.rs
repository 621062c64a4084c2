//! Naming conventions: task ids, observation ids, tile strings and file
//! discovery.

use chrono::NaiveDate;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::grid::TileIndex;

const GEOTIFF_EXTENSIONS: [&str; 3] = ["tif", "tiff", "gtiff"];

/// `"{solar_day}/x{X:03}/y{Y:03}"`
pub fn task_id(solar_day: NaiveDate, tile: TileIndex) -> String {
    format!("{}/x{:03}/y{:03}", solar_day.format("%Y-%m-%d"), tile.x, tile.y)
}

/// `"{task_id}_{uid}"`
pub fn observation_id(task_id: &str, uid: &str) -> String {
    format!("{}_{}", task_id, uid)
}

/// First non-negative three-digit number following `prefix` in `s`.
fn prefixed_number(s: &str, prefix: char) -> Option<i32> {
    let bytes = s.as_bytes();
    (0..bytes.len().saturating_sub(3)).find_map(|i| {
        let digits = &bytes[i + 1..i + 4];
        if char::from(bytes[i]) == prefix && digits.iter().all(u8::is_ascii_digit) {
            std::str::from_utf8(digits).ok()?.parse().ok()
        } else {
            None
        }
    })
}

/// Parse the tile index out of a string such as `x199_y035` or
/// `waterbodies_x199_y035`.
pub fn tile_index_from_str(s: &str) -> Result<TileIndex> {
    match (prefixed_number(s, 'x'), prefixed_number(s, 'y')) {
        (Some(x), Some(y)) => Ok(TileIndex::new(x, y)),
        _ => Err(Error::InvalidArgument(format!("no tile index in '{}'", s))),
    }
}

/// Parse the tile index out of a file name, ignoring directories and extension.
pub fn tile_index_from_path(path: &Path) -> Result<TileIndex> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::InvalidArgument(format!("bad file name {}", path.display())))?;
    tile_index_from_str(stem)
}

fn is_geotiff(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| GEOTIFF_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Recursively find GeoTIFF files under `dir`, optionally keeping only those
/// whose file name contains `name_filter`. Sorted by path.
pub fn find_geotiff_files(dir: &Path, name_filter: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let name_matches = name_filter.is_none_or(|f| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.contains(f))
            });
            if is_geotiff(&path) && name_matches {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Find files with the given extension in `dir` (not recursive). Sorted.
pub fn find_files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(extension) {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_and_observation_ids() {
        let day = NaiveDate::from_ymd_opt(2016, 4, 5).unwrap();
        let id = task_id(day, TileIndex::new(199, 35));
        assert_eq!(id, "2016-04-05/x199/y035");
        assert_eq!(observation_id(&id, "k3w9"), "2016-04-05/x199/y035_k3w9");
    }

    #[test]
    fn test_tile_index_from_str() {
        assert_eq!(tile_index_from_str("x199_y035").unwrap(), TileIndex::new(199, 35));
        assert_eq!(
            tile_index_from_str("waterbodies_x007_y120").unwrap(),
            TileIndex::new(7, 120)
        );
        assert!(tile_index_from_str("tile_7_120").is_err());
    }

    #[test]
    fn test_tile_index_roundtrips_display() {
        let tile = TileIndex::new(42, 9);
        assert_eq!(tile.to_string().parse::<TileIndex>().unwrap(), tile);
    }

    #[test]
    fn test_tile_index_from_path() {
        let path = Path::new("/data/rasters/x199_y035.tif");
        assert_eq!(tile_index_from_path(path).unwrap(), TileIndex::new(199, 35));
    }

    #[test]
    fn test_find_geotiff_files() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        for name in ["x001_y002.tif", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::write(nested.join("x003_y004.TIFF"), b"").unwrap();
        std::fs::write(nested.join("x005_y006.gtiff"), b"").unwrap();

        let all = find_geotiff_files(dir.path(), None).unwrap();
        assert_eq!(all.len(), 3);

        let filtered = find_geotiff_files(dir.path(), Some("x003_y004")).unwrap();
        assert_eq!(filtered, vec![nested.join("x003_y004.TIFF")]);
    }
}
