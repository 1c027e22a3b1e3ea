//! Extract definitions and the server's view of submitted extracts.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// Name of the NHGIS data collection.
pub const NHGIS_COLLECTION: &str = "nhgis";

const DEFAULT_DESCRIPTION: &str = "My IPUMS NHGIS Extract";
const DEFAULT_DATA_FORMAT: &str = "csv_no_header";
const DEFAULT_BREAKDOWN_LAYOUT: &str = "single_file";
const DEFAULT_TST_LAYOUT: &str = "time_by_column_layout";

/// Top-level request fields owned by [`NhgisExtract`]; extra fields may not replace them.
const RESERVED_FIELDS: &[&str] = &[
    "description",
    "collection",
    "shapefiles",
    "datasets",
    "dataFormat",
    "breakdownAndDataTypeLayout",
    "geographicExtents",
    "timeSeriesTables",
    "timeSeriesTableLayout",
];

/// Data tables and geographic levels requested from one dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSelection {
    pub data_tables: Vec<String>,
    pub geog_levels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub years: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown_values: Option<Vec<String>>,
}

impl DatasetSelection {
    pub fn new<T, G>(data_tables: T, geog_levels: G) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
        G: IntoIterator,
        G::Item: Into<String>,
    {
        Self {
            data_tables: data_tables.into_iter().map(Into::into).collect(),
            geog_levels: geog_levels.into_iter().map(Into::into).collect(),
            years: None,
            breakdown_values: None,
        }
    }

    pub fn with_years<I: IntoIterator<Item = S>, S: Into<String>>(mut self, years: I) -> Self {
        self.years = Some(years.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_breakdown_values<I: IntoIterator<Item = S>, S: Into<String>>(mut self, values: I) -> Self {
        self.breakdown_values = Some(values.into_iter().map(Into::into).collect());
        self
    }
}

/// Geographic levels (and optionally years) requested for one time-series table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesTableSelection {
    pub geog_levels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub years: Option<Vec<String>>,
}

impl TimeSeriesTableSelection {
    pub fn new<G: IntoIterator<Item = S>, S: Into<String>>(geog_levels: G) -> Self {
        Self {
            geog_levels: geog_levels.into_iter().map(Into::into).collect(),
            years: None,
        }
    }

    pub fn with_years<I: IntoIterator<Item = S>, S: Into<String>>(mut self, years: I) -> Self {
        self.years = Some(years.into_iter().map(Into::into).collect());
        self
    }
}

/// An NHGIS extract request.
///
/// Built with the `with_*` setters, turned into the API's JSON body by
/// [`NhgisExtract::build`]. Values are not validated locally; the API reports
/// invalid tables, levels or layouts when the extract is submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct NhgisExtract {
    datasets: Option<BTreeMap<String, DatasetSelection>>,
    time_series_tables: Option<BTreeMap<String, TimeSeriesTableSelection>>,
    shapefiles: Vec<String>,
    geographic_extents: Option<Vec<String>>,
    breakdown_and_data_type_layout: String,
    tst_layout: String,
    description: String,
    data_format: String,
    extra: Map<String, Value>,
    extract_id: Option<u64>,
}

impl Default for NhgisExtract {
    fn default() -> Self {
        Self {
            datasets: None,
            time_series_tables: None,
            shapefiles: Vec::new(),
            geographic_extents: None,
            breakdown_and_data_type_layout: DEFAULT_BREAKDOWN_LAYOUT.to_string(),
            tst_layout: DEFAULT_TST_LAYOUT.to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
            data_format: DEFAULT_DATA_FORMAT.to_string(),
            extra: Map::new(),
            extract_id: None,
        }
    }
}

impl NhgisExtract {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(mut self, name: impl Into<String>, selection: DatasetSelection) -> Self {
        self.datasets
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), selection);
        self
    }

    pub fn with_datasets(mut self, datasets: BTreeMap<String, DatasetSelection>) -> Self {
        self.datasets = Some(datasets);
        self
    }

    pub fn with_time_series_table(
        mut self,
        name: impl Into<String>,
        selection: TimeSeriesTableSelection,
    ) -> Self {
        self.time_series_tables
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), selection);
        self
    }

    pub fn with_time_series_tables(
        mut self,
        tables: BTreeMap<String, TimeSeriesTableSelection>,
    ) -> Self {
        self.time_series_tables = Some(tables);
        self
    }

    pub fn with_shapefiles<I: IntoIterator<Item = S>, S: Into<String>>(mut self, shapefiles: I) -> Self {
        self.shapefiles = shapefiles.into_iter().map(Into::into).collect();
        self
    }

    /// Geographic extents (state codes such as `"010"`) limiting the requested areas.
    pub fn with_geographic_extents<I: IntoIterator<Item = S>, S: Into<String>>(
        mut self,
        extents: I,
    ) -> Self {
        self.geographic_extents = Some(extents.into_iter().map(Into::into).collect());
        self
    }

    /// `single_file` or `separate_files`.
    pub fn with_breakdown_and_data_type_layout(mut self, layout: impl Into<String>) -> Self {
        self.breakdown_and_data_type_layout = layout.into();
        self
    }

    /// `time_by_column_layout`, `time_by_row_layout` or `time_by_file_layout`.
    pub fn with_tst_layout(mut self, layout: impl Into<String>) -> Self {
        self.tst_layout = layout.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// `csv_no_header`, `csv_header` or `fixed_width`.
    pub fn with_data_format(mut self, data_format: impl Into<String>) -> Self {
        self.data_format = data_format.into();
        self
    }

    /// Adds a top-level request field the typed setters do not cover.
    ///
    /// Names of fields this type already manages are ignored with a warning.
    pub fn with_extra(mut self, name: impl Into<String>, value: Value) -> Self {
        let name = name.into();
        if RESERVED_FIELDS.contains(&name.as_str()) {
            tracing::warn!(
                field = %name,
                "`{}` is set by NhgisExtract itself; use the dedicated setter instead. The extra value is ignored.",
                name
            );
            return self;
        }
        self.extra.insert(name, value);
        self
    }

    pub fn collection(&self) -> &str {
        NHGIS_COLLECTION
    }

    /// Extract number assigned by the API once submitted.
    pub fn extract_id(&self) -> Option<u64> {
        self.extract_id
    }

    pub(crate) fn set_extract_id(&mut self, id: u64) {
        self.extract_id = Some(id);
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn datasets(&self) -> Option<&BTreeMap<String, DatasetSelection>> {
        self.datasets.as_ref()
    }

    pub fn time_series_tables(&self) -> Option<&BTreeMap<String, TimeSeriesTableSelection>> {
        self.time_series_tables.as_ref()
    }

    pub fn shapefiles(&self) -> &[String] {
        &self.shapefiles
    }

    /// JSON body submitted to the extracts endpoint.
    pub fn build(&self) -> Value {
        let mut body = self.extra.clone();
        body.insert("description".into(), Value::from(self.description.as_str()));
        body.insert("collection".into(), Value::from(self.collection()));
        body.insert("shapefiles".into(), Value::from(self.shapefiles.clone()));

        if let Some(datasets) = &self.datasets {
            body.insert("datasets".into(), to_value(datasets));
            body.insert("dataFormat".into(), Value::from(self.data_format.as_str()));
            body.insert(
                "breakdownAndDataTypeLayout".into(),
                Value::from(self.breakdown_and_data_type_layout.as_str()),
            );
            if let Some(extents) = &self.geographic_extents {
                body.insert("geographicExtents".into(), Value::from(extents.clone()));
            }
        }

        if let Some(tables) = &self.time_series_tables {
            body.insert("timeSeriesTables".into(), to_value(tables));
            body.insert("timeSeriesTableLayout".into(), Value::from(self.tst_layout.as_str()));
        }

        Value::Object(body)
    }

    /// Rebuilds an unsubmitted extract from an `extractDefinition` returned by the API.
    pub fn from_definition(definition: &Value) -> Result<Self> {
        let def: ExtractDefinition = serde_json::from_value(definition.clone())?;
        if let Some(collection) = def.collection.as_deref() {
            if collection != NHGIS_COLLECTION {
                return Err(Error::InvalidArgument(format!(
                    "extract definition belongs to collection `{}`, not `{}`",
                    collection, NHGIS_COLLECTION
                )));
            }
        }

        let defaults = Self::default();
        Ok(Self {
            datasets: def.datasets,
            time_series_tables: def.time_series_tables,
            shapefiles: def.shapefiles.unwrap_or_default(),
            geographic_extents: def.geographic_extents,
            breakdown_and_data_type_layout: def
                .breakdown_and_data_type_layout
                .unwrap_or(defaults.breakdown_and_data_type_layout),
            tst_layout: def.time_series_table_layout.unwrap_or(defaults.tst_layout),
            description: def.description.unwrap_or(defaults.description),
            data_format: def.data_format.unwrap_or(defaults.data_format),
            extra: Map::new(),
            extract_id: None,
        })
    }
}

fn to_value<T: Serialize>(v: &T) -> Value {
    // Selections are plain strings and vectors; serialization cannot fail.
    serde_json::to_value(v).unwrap_or(Value::Null)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractDefinition {
    #[serde(default)]
    collection: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    datasets: Option<BTreeMap<String, DatasetSelection>>,
    #[serde(default)]
    time_series_tables: Option<BTreeMap<String, TimeSeriesTableSelection>>,
    #[serde(default)]
    shapefiles: Option<Vec<String>>,
    #[serde(default)]
    geographic_extents: Option<Vec<String>>,
    #[serde(default)]
    breakdown_and_data_type_layout: Option<String>,
    #[serde(default)]
    time_series_table_layout: Option<String>,
    #[serde(default)]
    data_format: Option<String>,
}

/// Identifies a previously submitted extract.
#[derive(Debug, Clone, Copy)]
pub enum ExtractRef<'a> {
    /// A submitted extract; number and collection are read from it.
    Extract(&'a NhgisExtract),
    /// A bare extract number; the collection must be supplied separately.
    Id(u64),
}

impl<'a> From<&'a NhgisExtract> for ExtractRef<'a> {
    fn from(extract: &'a NhgisExtract) -> Self {
        ExtractRef::Extract(extract)
    }
}

impl From<u64> for ExtractRef<'_> {
    fn from(id: u64) -> Self {
        ExtractRef::Id(id)
    }
}

impl ExtractRef<'_> {
    /// Resolves the extract number and collection name.
    pub fn resolve(&self, collection: Option<&str>) -> Result<(u64, String)> {
        match self {
            ExtractRef::Extract(extract) => {
                let id = extract.extract_id().ok_or_else(|| {
                    Error::InvalidArgument(
                        "extract has not been submitted yet; call `submit_extract` first".to_string(),
                    )
                })?;
                Ok((id, extract.collection().to_string()))
            }
            ExtractRef::Id(id) => match collection {
                Some(c) if !c.is_empty() => Ok((*id, c.to_string())),
                _ => Err(Error::InvalidArgument(
                    "when `extract` is a bare extract number, `collection` must be given".to_string(),
                )),
            },
        }
    }
}

/// Processing state of a submitted extract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractStatus {
    Queued,
    Started,
    Produced,
    Canceled,
    Failed,
    Completed,
    /// The API has no such extract (HTTP 404).
    NotFound,
    Other(String),
}

impl From<&str> for ExtractStatus {
    fn from(s: &str) -> Self {
        match s {
            "queued" => ExtractStatus::Queued,
            "started" => ExtractStatus::Started,
            "produced" => ExtractStatus::Produced,
            "canceled" => ExtractStatus::Canceled,
            "failed" => ExtractStatus::Failed,
            "completed" => ExtractStatus::Completed,
            "not found" => ExtractStatus::NotFound,
            other => ExtractStatus::Other(other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for ExtractStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(ExtractStatus::from(s.as_str()))
    }
}

impl fmt::Display for ExtractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExtractStatus::Queued => "queued",
            ExtractStatus::Started => "started",
            ExtractStatus::Produced => "produced",
            ExtractStatus::Canceled => "canceled",
            ExtractStatus::Failed => "failed",
            ExtractStatus::Completed => "completed",
            ExtractStatus::NotFound => "not found",
            ExtractStatus::Other(s) => s.as_str(),
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DownloadLink {
    pub(crate) url: String,
}

// Expired extracts come back with an empty `downloadLinks` object.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DownloadLinks {
    #[serde(default)]
    pub(crate) table_data: Option<DownloadLink>,
    #[serde(default)]
    pub(crate) gis_data: Option<DownloadLink>,
}

impl DownloadLinks {
    pub(crate) fn urls(&self) -> Vec<String> {
        [&self.table_data, &self.gis_data]
            .into_iter()
            .flatten()
            .map(|l| l.url.clone())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExtractInfo {
    pub(crate) status: ExtractStatus,
    #[serde(default)]
    pub(crate) download_links: DownloadLinks,
    #[serde(default)]
    pub(crate) extract_definition: Option<Value>,
}
