//! I/O operations for reading and writing geospatial data

mod metadata;
mod native;

pub use metadata::GeoTiffMetadata;
pub use native::{
    GeoTiffOptions, SampleFormat, read_geotiff, read_geotiff_with_metadata, write_geotiff,
};
