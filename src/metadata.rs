use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Default number of records requested per metadata page.
pub const DEFAULT_PAGE_SIZE: u32 = 2500;

/// Metadata listings published for NHGIS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataType {
    Datasets,
    DataTables,
    TimeSeriesTables,
    Shapefiles,
}

impl MetadataType {
    pub const ALL: [MetadataType; 4] = [
        MetadataType::Datasets,
        MetadataType::DataTables,
        MetadataType::TimeSeriesTables,
        MetadataType::Shapefiles,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataType::Datasets => "datasets",
            MetadataType::DataTables => "data_tables",
            MetadataType::TimeSeriesTables => "time_series_tables",
            MetadataType::Shapefiles => "shapefiles",
        }
    }
}

impl fmt::Display for MetadataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetadataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        MetadataType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "\"{}\" is not a valid metadata endpoint. Valid endpoints: {}",
                    s,
                    MetadataType::ALL.map(|t| t.as_str()).join(", ")
                ))
            })
    }
}

/// Selects one metadata listing or one metadata record.
///
/// Precedence follows the fields' order: a `type` lists a whole catalog,
/// otherwise `dataset` (optionally narrowed by `data_table`), otherwise
/// `time_series_table`.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataQuery {
    pub kind: Option<String>,
    pub dataset: Option<String>,
    pub data_table: Option<String>,
    pub time_series_table: Option<String>,
    pub page_size: u32,
}

impl Default for MetadataQuery {
    fn default() -> Self {
        Self {
            kind: None,
            dataset: None,
            data_table: None,
            time_series_table: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl MetadataQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lists every record of one catalog (`datasets`, `data_tables`, ...).
    pub fn listing(kind: impl Into<String>) -> Self {
        Self::default().with_type(kind)
    }

    pub fn with_type(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = Some(dataset.into());
        self
    }

    pub fn with_data_table(mut self, data_table: impl Into<String>) -> Self {
        self.data_table = Some(data_table.into());
        self
    }

    pub fn with_time_series_table(mut self, table: impl Into<String>) -> Self {
        self.time_series_table = Some(table.into());
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub(crate) fn target(&self) -> Result<MetadataTarget> {
        if let Some(kind) = &self.kind {
            return Ok(MetadataTarget::Listing(kind.parse()?));
        }
        if let Some(dataset) = &self.dataset {
            let path = match &self.data_table {
                Some(table) => format!("datasets/{}/data_tables/{}", dataset, table),
                None => format!("datasets/{}", dataset),
            };
            return Ok(MetadataTarget::Record(path));
        }
        if let Some(table) = &self.time_series_table {
            return Ok(MetadataTarget::Record(format!("time_series_tables/{}", table)));
        }
        Err(Error::InvalidArgument(
            "a metadata query needs one of `type`, `dataset` or `time_series_table`".to_string(),
        ))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MetadataTarget {
    /// Paginated catalog listing.
    Listing(MetadataType),
    /// Single record, path relative to the metadata root.
    Record(String),
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct MetadataPage {
    #[serde(default)]
    pub(crate) data: Vec<Value>,
    #[serde(default)]
    links: PageLinks,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageLinks {
    #[serde(default)]
    next_page: Option<String>,
}

impl MetadataPage {
    pub(crate) fn next_page(&self) -> Option<&str> {
        self.links
            .next_page
            .as_deref()
            .filter(|s| !s.trim().is_empty())
    }
}
