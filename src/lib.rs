//! A small Rust client for the IPUMS NHGIS API.
//!
//! This crate covers the NHGIS extract workflow:
//! describe an extract, submit it, wait for completion, download the resulting
//! archives, then read tables and shapefiles straight out of those archives.
//! It also browses the NHGIS metadata catalog.
//!
//! ## Quick start
//! - Configure authentication via the `IPUMS_API_KEY` environment variable or a
//!   `.ipumsrc` file (supported in the current directory and in your home directory).
//! - Build an [`NhgisExtract`] and call [`Client::retrieve`].
//!
//! ```no_run
//! use nhgisapi::{Client, DatasetSelection, NhgisExtract, read_table};
//! use std::path::Path;
//!
//! fn main() -> nhgisapi::Result<()> {
//!     let client = Client::from_env()?;
//!     let mut extract = NhgisExtract::new()
//!         .with_dataset("2010_SF1a", DatasetSelection::new(["P1"], ["state"]))
//!         .with_shapefiles(["us_state_2010_tl2010"])
//!         .with_description("2010 population by state");
//!
//!     let files = client.retrieve(&mut extract, Some(Path::new(".")))?;
//!     let table = read_table(&files[0], Some("state"))?;
//!     println!("{} rows", table.len());
//!     Ok(())
//! }
//! ```
//!
//! For full usage and configuration details, see the crate README.

#![forbid(unsafe_code)]

mod archive;
mod client;
mod config;
mod download;
mod error;
mod extract;
mod metadata;
mod util;

pub use archive::{Feature, FeatureCollection, Table, list_entries, read_geography, read_table};
pub use client::{Client, ClientConfig, DEFAULT_API_VERSION};
pub use error::{Error, Result};
pub use extract::{
    DatasetSelection, ExtractRef, ExtractStatus, NHGIS_COLLECTION, NhgisExtract,
    TimeSeriesTableSelection,
};
pub use metadata::{DEFAULT_PAGE_SIZE, MetadataQuery, MetadataType};
pub use shapefile::dbase::{FieldValue, Record};
pub use shapefile::{Shape, ShapeType};
