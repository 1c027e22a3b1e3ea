//! Reading files out of downloaded NHGIS extract archives.
//!
//! NHGIS delivers table data as a zip of CSV files and GIS data as a zip of
//! zipped shapefiles. Entries are addressed by regular expressions matched
//! anywhere in the entry name, e.g. `"ds172_2010_state"` or `r"\.csv$"`.

use regex::Regex;
use shapefile::dbase::{FieldValue, Record};
use shapefile::{Shape, ShapeType};
use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;
use zip::ZipArchive;

use crate::error::{Error, Result};

/// Lists the entry names of the archive at `path`, in archive order.
///
/// With a `pattern`, only matching names are returned and an empty result is
/// an [`Error::NotFound`] that lists every entry.
pub fn list_entries(path: impl AsRef<Path>, pattern: Option<&str>) -> Result<Vec<String>> {
    let archive = open_archive(path.as_ref())?;
    let names = entry_names(&archive);

    let Some(pattern) = pattern else {
        return Ok(names);
    };

    let re = compile(pattern)?;
    let matched: Vec<String> = names.iter().filter(|n| re.is_match(n)).cloned().collect();
    if matched.is_empty() {
        return Err(no_match(Some(pattern), &names));
    }
    Ok(matched)
}

/// Parses the single CSV entry matching `selector` into a [`Table`].
///
/// Without a selector the archive must hold exactly one entry.
pub fn read_table(path: impl AsRef<Path>, selector: Option<&str>) -> Result<Table> {
    let mut archive = open_archive(path.as_ref())?;
    let names = entry_names(&archive);
    let index = select_one(&names, selector)?;

    let entry = archive.by_index(index)?;
    Table::from_reader(entry)
}

/// Reads the single shapefile entry matching `selector` into a [`FeatureCollection`].
///
/// The matched entry is either a zipped shapefile (the way NHGIS ships GIS
/// data) or a `.shp` whose `.dbf` and `.prj` sit next to it in the same archive.
pub fn read_geography(path: impl AsRef<Path>, selector: Option<&str>) -> Result<FeatureCollection> {
    let mut archive = open_archive(path.as_ref())?;
    let names = entry_names(&archive);
    let index = select_one(&names, selector)?;
    let name = names[index].as_str();

    if has_extension(name, ".zip") {
        let bytes = read_entry(&mut archive, name)?;
        let mut inner = ZipArchive::new(Cursor::new(bytes))?;
        let inner_names = entry_names(&inner);
        let shp = single_shp(&inner_names, name)?;
        read_shapefile(&mut inner, &inner_names, &shp)
    } else if has_extension(name, ".shp") {
        read_shapefile(&mut archive, &names, name)
    } else {
        Err(Error::NotFound(format!(
            "\"{}\" is neither a shapefile (.shp) nor a zipped shapefile (.zip). Available files:\n{}",
            name,
            names.join("\n")
        )))
    }
}

/// Rows of string cells under named columns, as parsed from one CSV entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Parses CSV with a header row from `reader`.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv = csv::Reader::from_reader(reader);
        let headers = csv.headers()?.iter().map(str::to_string).collect();
        let rows = csv
            .records()
            .map(|r| r.map(|rec| rec.iter().map(str::to_string).collect()))
            .collect::<std::result::Result<Vec<Vec<String>>, csv::Error>>()?;
        Ok(Self { headers, rows })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Number of data rows (the header row is not counted).
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Cells of the column named `name`, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let i = self.column_index(name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(i).map(String::as_str).unwrap_or(""))
                .collect(),
        )
    }
}

/// One shape with its attribute record.
pub struct Feature {
    pub geometry: Shape,
    pub attributes: Record,
}

impl Feature {
    pub fn attribute(&self, name: &str) -> Option<&FieldValue> {
        self.attributes.get(name)
    }
}

// `Shape` has no `Debug`, so only its type is printed.
impl fmt::Debug for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feature")
            .field("shape_type", &self.geometry.shapetype())
            .field("attributes", &self.attributes)
            .finish()
    }
}

/// Every feature of one shapefile.
pub struct FeatureCollection {
    pub shape_type: ShapeType,
    pub features: Vec<Feature>,
    /// Coordinate reference system from the `.prj` file, as WKT.
    pub crs_wkt: Option<String>,
}

impl FeatureCollection {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl fmt::Debug for FeatureCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureCollection")
            .field("shape_type", &self.shape_type)
            .field("features", &self.features.len())
            .field("crs_wkt", &self.crs_wkt)
            .finish()
    }
}

fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(format!("{} does not exist", path.display()))
        } else {
            Error::Io(e)
        }
    })?;
    Ok(ZipArchive::new(file)?)
}

fn entry_names<R: Read + Seek>(archive: &ZipArchive<R>) -> Vec<String> {
    (0..archive.len())
        .filter_map(|i| archive.name_for_index(i))
        .map(str::to_string)
        .collect()
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| Error::InvalidArgument(format!("invalid file pattern \"{}\": {}", pattern, e)))
}

fn no_match(pattern: Option<&str>, names: &[String]) -> Error {
    Error::NotFound(format!(
        "No files matching pattern \"{}\" were found. Available files:\n{}",
        pattern.unwrap_or(""),
        names.join("\n")
    ))
}

fn select_one(names: &[String], selector: Option<&str>) -> Result<usize> {
    let selected: Vec<usize> = match selector {
        Some(pattern) => {
            let re = compile(pattern)?;
            names
                .iter()
                .enumerate()
                .filter(|(_, n)| re.is_match(n))
                .map(|(i, _)| i)
                .collect()
        }
        None => (0..names.len()).collect(),
    };

    match selected.as_slice() {
        [index] => Ok(*index),
        [] => Err(no_match(selector, names)),
        many => Err(Error::NotFound(format!(
            "Multiple files selected ({} matches); narrow the pattern to a single file. Available files:\n{}",
            many.len(),
            names.join("\n")
        ))),
    }
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>> {
    let mut entry = archive.by_name(name)?;
    let mut bytes = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
    entry.read_to_end(&mut bytes)?;
    Ok(bytes)
}

fn has_extension(name: &str, ext: &str) -> bool {
    name.len() >= ext.len()
        && name
            .get(name.len() - ext.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(ext))
}

fn single_shp(names: &[String], container: &str) -> Result<String> {
    let shps: Vec<&String> = names.iter().filter(|n| has_extension(n, ".shp")).collect();
    match shps.as_slice() {
        [shp] => Ok((*shp).clone()),
        [] => Err(Error::NotFound(format!(
            "\"{}\" holds no .shp file. Its files:\n{}",
            container,
            names.join("\n")
        ))),
        _ => Err(Error::NotFound(format!(
            "\"{}\" holds several .shp files. Its files:\n{}",
            container,
            names.join("\n")
        ))),
    }
}

/// Entry next to `shp` with the same stem and extension `ext`, any case.
fn sidecar<'a>(names: &'a [String], shp: &str, ext: &str) -> Option<&'a str> {
    let stem = &shp[..shp.len() - ".shp".len()];
    names
        .iter()
        .map(String::as_str)
        .find(|n| n.len() == stem.len() + ext.len() && n.starts_with(stem) && has_extension(n, ext))
}

fn read_shapefile<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    names: &[String],
    shp: &str,
) -> Result<FeatureCollection> {
    let dbf = sidecar(names, shp, ".dbf").ok_or_else(|| {
        Error::NotFound(format!(
            "no .dbf attribute file found next to \"{}\". Available files:\n{}",
            shp,
            names.join("\n")
        ))
    })?;

    let shp_bytes = read_entry(archive, shp)?;
    let dbf_bytes = read_entry(archive, dbf)?;
    let crs_wkt = match sidecar(names, shp, ".prj") {
        Some(prj) => Some(String::from_utf8_lossy(&read_entry(archive, prj)?).trim().to_string()),
        None => None,
    };

    let shape_reader = shapefile::ShapeReader::new(Cursor::new(shp_bytes))?;
    let shape_type = shape_reader.header().shape_type;
    let dbf_reader =
        shapefile::dbase::Reader::new(Cursor::new(dbf_bytes)).map_err(shapefile::Error::from)?;
    let mut reader = shapefile::Reader::new(shape_reader, dbf_reader);

    let features = reader
        .iter_shapes_and_records()
        .map(|r| r.map(|(geometry, attributes)| Feature { geometry, attributes }))
        .collect::<std::result::Result<Vec<_>, shapefile::Error>>()?;

    Ok(FeatureCollection {
        shape_type,
        features,
        crs_wkt,
    })
}
