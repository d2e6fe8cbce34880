//! CSV snapshots on disk.
//!
//! Every successful live resolution overwrites its snapshot; when the service
//! cannot be reached the pipeline reads the last snapshot back instead.

use crate::models::{
    CodeEntry, Codelist, DataSource, DatasetDescriptor, ResultRow, ResultTable, columns,
};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::{ReaderBuilder, WriterBuilder};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Longest piece a single search term contributes to a signature.
const TERM_PIECE_LEN: usize = 16;
/// Longest piece the joined country list contributes to a signature.
const COUNTRY_PIECE_LEN: usize = 40;

/// Inputs that identify one query's snapshot files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySignature<'a> {
    pub dataset: &'a str,
    pub search_terms: &'a [String],
    pub countries: &'a [String],
    pub period: &'a str,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
}

impl QuerySignature<'_> {
    /// Deterministic file stem, at most `max_len` characters.
    pub fn stem(&self, max_len: usize) -> String {
        let terms = if self.search_terms.is_empty() {
            "ALL".to_string()
        } else {
            self.search_terms
                .iter()
                .map(|t| truncate_chars(&sanitize(t), TERM_PIECE_LEN))
                .collect::<Vec<_>>()
                .join("_")
        };
        let countries = truncate_chars(&sanitize(&self.countries.join("_")), COUNTRY_PIECE_LEN);
        let year = |y: Option<i32>| y.map(|y| y.to_string()).unwrap_or_else(|| "NA".into());
        let stem = format!(
            "{}_{}_{}_{}_{}_{}",
            sanitize(self.dataset),
            terms,
            countries,
            sanitize(self.period),
            year(self.start_year),
            year(self.end_year)
        );
        truncate_chars(&stem, max_len)
    }
}

fn sanitize(s: &str) -> String {
    s.trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

fn truncate_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

/// Directory of CSV snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStore {
    dir: PathBuf,
    max_filename_len: usize,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>, max_filename_len: usize) -> Self {
        Self {
            dir: dir.into(),
            max_filename_len,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.dir.join("series_imf.csv")
    }

    pub fn filtered_catalog_path(&self, filter: &str) -> PathBuf {
        self.file("series", &sanitize(&filter.to_lowercase()))
    }

    pub fn codelist_path(&self, codelist: &str) -> PathBuf {
        self.file("dim", &sanitize(&codelist.to_lowercase()))
    }

    pub fn meta_path(&self, sig: &QuerySignature<'_>) -> PathBuf {
        self.file("meta", &sig.stem(self.max_filename_len))
    }

    pub fn data_path(&self, sig: &QuerySignature<'_>) -> PathBuf {
        self.file("data", &sig.stem(self.max_filename_len))
    }

    fn file(&self, prefix: &str, stem: &str) -> PathBuf {
        let name = truncate_chars(&format!("{prefix}_{stem}"), self.max_filename_len);
        self.dir.join(format!("{name}.csv"))
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create cache directory {}", self.dir.display()))
    }
}

/// Save a dataset catalog (`code,name,flow_id`).
pub fn save_catalog<P: AsRef<Path>>(datasets: &[DatasetDescriptor], path: P) -> Result<()> {
    let mut wtr = WriterBuilder::new().from_path(path)?;
    for d in datasets {
        wtr.serialize(d)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Read a catalog written by [`save_catalog`]; `None` when the file is absent.
pub fn load_catalog<P: AsRef<Path>>(path: P) -> Result<Option<Vec<DatasetDescriptor>>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let mut rdr = ReaderBuilder::new()
        .from_path(path)
        .with_context(|| format!("open {}", path.display()))?;
    let rows = rdr
        .deserialize()
        .collect::<std::result::Result<Vec<DatasetDescriptor>, _>>()
        .with_context(|| format!("read catalog {}", path.display()))?;
    Ok(Some(rows))
}

/// Save codes (`ID,DESCRIPTION` plus any extra code columns). Used for
/// codelists and for resolved metadata tables.
pub fn save_codes<P: AsRef<Path>>(entries: &[CodeEntry], path: P) -> Result<()> {
    let extra: BTreeSet<&String> = entries.iter().flat_map(|e| e.attributes.keys()).collect();
    let mut wtr = WriterBuilder::new().from_path(path)?;
    wtr.write_record(
        [columns::ID, columns::DESCRIPTION]
            .into_iter()
            .chain(extra.iter().map(|c| c.as_str())),
    )?;
    for e in entries {
        let cells = extra
            .iter()
            .map(|c| e.attributes.get(*c).map(String::as_str).unwrap_or_default());
        wtr.write_record([e.value.as_str(), e.description.as_str()].into_iter().chain(cells))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Read a codelist written by [`save_codes`]; `None` when the file is absent.
pub fn load_codelist<P: AsRef<Path>>(id: &str, path: P) -> Result<Option<Codelist>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let mut rdr = ReaderBuilder::new()
        .from_path(path)
        .with_context(|| format!("open {}", path.display()))?;
    let headers = rdr.headers()?.clone();
    let mut entries = Vec::new();
    for rec in rdr.records() {
        let rec = rec.with_context(|| format!("read codelist {}", path.display()))?;
        let mut entry = CodeEntry::new(rec.get(0).unwrap_or_default(), rec.get(1).unwrap_or_default());
        for (col, cell) in headers.iter().zip(rec.iter()).skip(2) {
            if !cell.is_empty() {
                entry.attributes.insert(col.to_string(), cell.to_string());
            }
        }
        entries.push(entry);
    }
    Ok(Some(Codelist::new(id, entries)))
}

/// Save a result table with its normalized column header.
pub fn save_table<P: AsRef<Path>>(table: &ResultTable, path: P) -> Result<()> {
    let mut wtr = WriterBuilder::new().from_path(path)?;
    wtr.write_record(&table.columns)?;
    for row in &table.rows {
        wtr.write_record(table.columns.iter().map(|c| row.cell(c)))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Read a table written by [`save_table`]; `None` when the file is absent.
///
/// Rows keep file order, which is the sorted order they were written in.
pub fn load_table<P: AsRef<Path>>(path: P) -> Result<Option<ResultTable>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let mut rdr = ReaderBuilder::new()
        .from_path(path)
        .with_context(|| format!("open {}", path.display()))?;
    let headers = rdr.headers()?.clone();
    let mut rows = Vec::new();
    for (n, rec) in rdr.records().enumerate() {
        let rec = rec.with_context(|| format!("read {} row {}", path.display(), n + 1))?;
        let mut row = ResultRow {
            id: String::new(),
            country: String::new(),
            period: NaiveDate::MIN,
            value: None,
            status: None,
            description: None,
            attributes: BTreeMap::new(),
        };
        for (col, cell) in headers.iter().zip(rec.iter()) {
            let non_empty = (!cell.is_empty()).then(|| cell.to_string());
            match col {
                columns::ID => row.id = cell.to_string(),
                columns::COUNTRY => row.country = cell.to_string(),
                columns::PERIOD => {
                    row.period = NaiveDate::parse_from_str(cell, "%Y-%m-%d").with_context(|| {
                        format!("bad period '{cell}' in {} row {}", path.display(), n + 1)
                    })?
                }
                columns::VALUE => row.value = cell.parse().ok(),
                columns::STATUS => row.status = non_empty,
                columns::DESCRIPTION => row.description = non_empty,
                other => {
                    if let Some(v) = non_empty {
                        row.attributes.insert(other.to_string(), v);
                    }
                }
            }
        }
        rows.push(row);
    }
    let mut table = ResultTable::from_rows(rows, DataSource::Cache);
    // Keep attribute columns that were present but empty in every row.
    for h in headers.iter() {
        if !table.columns.iter().any(|c| c == h) {
            table.columns.push(h.to_string());
        }
    }
    Ok(Some(table))
}

/// Write `f`'s output into the store, creating the directory first.
pub(crate) fn write_with<F>(store: &CacheStore, path: &Path, f: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    store.ensure_dir()?;
    f(path).with_context(|| format!("write {}", path.display()))
}
