use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

/// Core column names of a [`ResultTable`], already normalized.
pub mod columns {
    pub const ID: &str = "ID";
    pub const COUNTRY: &str = "COUNTRY";
    pub const PERIOD: &str = "PERIOD";
    pub const VALUE: &str = "VALUE";
    pub const STATUS: &str = "STATUS";
    pub const DESCRIPTION: &str = "DESCRIPTION";

    pub const CORE: [&str; 6] = [ID, COUNTRY, PERIOD, VALUE, STATUS, DESCRIPTION];
}

/// Observation frequency, as used in the first position of a request key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    Annual,
    Quarterly,
    Monthly,
}

impl Frequency {
    pub fn code(self) -> &'static str {
        match self {
            Frequency::Annual => "A",
            Frequency::Quarterly => "Q",
            Frequency::Monthly => "M",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "A" => Some(Frequency::Annual),
            "Q" => Some(Frequency::Quarterly),
            "M" => Some(Frequency::Monthly),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Frequency::Annual => "Annual",
            Frequency::Quarterly => "Quarterly",
            Frequency::Monthly => "Monthly",
        }
    }

    /// First day of the period containing `date`.
    pub fn truncate(self, date: NaiveDate) -> NaiveDate {
        let (y, m) = (date.year(), date.month());
        let month = match self {
            Frequency::Annual => 1,
            Frequency::Quarterly => (m - 1) / 3 * 3 + 1,
            Frequency::Monthly => m,
        };
        NaiveDate::from_ymd_opt(y, month, 1).unwrap_or(date)
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Parse a service time period (`YYYY`, `YYYY-Qn`, `YYYY-MM`, `YYYY-MM-DD`)
/// into the first day of that period. The separator is optional.
pub fn parse_time_period(raw: &str) -> Option<NaiveDate> {
    let s: String = raw.trim().chars().filter(|c| *c != '-').collect();
    if s.len() < 4 || !s.is_ascii() {
        return None;
    }
    let year: i32 = s[..4].parse().ok()?;
    let rest = &s[4..];
    let (month, day) = if rest.is_empty() {
        (1, 1)
    } else if let Some(q) = rest.strip_prefix(['Q', 'q']) {
        let q: u32 = q.parse().ok()?;
        if !(1..=4).contains(&q) {
            return None;
        }
        ((q - 1) * 3 + 1, 1)
    } else if rest.len() == 2 {
        (rest.parse().ok()?, 1)
    } else if rest.len() == 4 {
        (rest[..2].parse().ok()?, rest[2..].parse().ok()?)
    } else {
        return None;
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Strip marker characters (`@`, `#`), collapse separators to `_`, uppercase.
///
/// `@OBS_VALUE` -> `OBS_VALUE`, `Description.#text` -> `DESCRIPTION_TEXT`.
pub fn normalize_column_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '@' | '#' => {}
            '.' | ' ' | '-' | ':' => {
                if !out.ends_with('_') {
                    out.push('_');
                }
            }
            c => out.extend(c.to_uppercase()),
        }
    }
    out.trim_matches('_').to_string()
}

/// One dataset in the service's catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    /// Key family id used in every other endpoint (e.g. `IFS`).
    pub code: String,
    pub name: String,
    /// Dataflow id as listed by the catalog (often `DS-IFS`).
    pub flow_id: String,
}

/// One axis of a dataset's composite key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionDescriptor {
    /// 1-based position in the key.
    pub position: usize,
    pub codelist: String,
    pub concept: Option<String>,
}

/// Ordered dimensions of a dataset plus the positions the pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetStructure {
    pub dataset: String,
    pub dimensions: Vec<DimensionDescriptor>,
    pub indicator_position: usize,
    pub area_position: Option<usize>,
    pub frequency_position: Option<usize>,
}

impl DatasetStructure {
    pub fn dimension(&self, position: usize) -> Option<&DimensionDescriptor> {
        self.dimensions.iter().find(|d| d.position == position)
    }

    pub fn indicator_codelist(&self) -> Option<&str> {
        self.dimension(self.indicator_position).map(|d| d.codelist.as_str())
    }

    pub fn area_codelist(&self) -> Option<&str> {
        self.area_position
            .and_then(|p| self.dimension(p))
            .map(|d| d.codelist.as_str())
    }

    pub fn frequency_codelist(&self) -> Option<&str> {
        self.frequency_position
            .and_then(|p| self.dimension(p))
            .map(|d| d.codelist.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeEntry {
    pub value: String,
    pub description: String,
    /// Any further text columns of the code, by normalized column name.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl CodeEntry {
    pub fn new(value: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            description: description.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Case-insensitive substring match over every text column.
    pub fn matches(&self, term: &str) -> bool {
        let term = term.to_lowercase();
        [&self.value, &self.description]
            .into_iter()
            .chain(self.attributes.values())
            .any(|v| v.to_lowercase().contains(&term))
    }
}

/// Valid values of one dimension, unique by code, in service order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Codelist {
    pub id: String,
    pub entries: Vec<CodeEntry>,
}

impl Codelist {
    /// Build a codelist, dropping later entries that repeat a code.
    pub fn new(id: impl Into<String>, entries: impl IntoIterator<Item = CodeEntry>) -> Self {
        let mut seen = HashSet::new();
        let entries = entries
            .into_iter()
            .filter(|e| seen.insert(e.value.clone()))
            .collect();
        Self {
            id: id.into(),
            entries,
        }
    }

    pub fn contains(&self, code: &str) -> bool {
        self.entries.iter().any(|e| e.value == code)
    }

    pub fn first(&self) -> Option<&CodeEntry> {
        self.entries.first()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Indicator codes selected by a search, with their descriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataTable {
    pub dataset: String,
    pub codelist: String,
    pub entries: Vec<CodeEntry>,
}

impl MetadataTable {
    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.value.clone()).collect()
    }

    pub fn entry(&self, id: &str) -> Option<&CodeEntry> {
        self.entries.iter().find(|e| e.value == id)
    }

    pub fn description_of(&self, id: &str) -> Option<&str> {
        self.entry(id).map(|e| e.description.as_str())
    }

    /// `ID`, `DESCRIPTION`, then every extra codelist column in lexicographic order.
    pub fn columns(&self) -> Vec<String> {
        let extra: BTreeSet<&String> = self
            .entries
            .iter()
            .flat_map(|e| e.attributes.keys())
            .collect();
        [columns::ID, columns::DESCRIPTION]
            .into_iter()
            .map(str::to_string)
            .chain(extra.into_iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One data point as parsed from a CompactData response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub country: String,
    pub period: NaiveDate,
    pub value: Option<f64>,
    pub status: Option<String>,
    /// Broadcast series attributes and extra observation attributes,
    /// keyed by normalized column name.
    pub attributes: BTreeMap<String, String>,
}

/// An observation joined with its indicator description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub id: String,
    pub country: String,
    pub period: NaiveDate,
    pub value: Option<f64>,
    pub status: Option<String>,
    pub description: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

impl ResultRow {
    pub fn key(&self) -> (&str, &str, NaiveDate) {
        (&self.id, &self.country, self.period)
    }

    /// Render one cell by normalized column name; missing values are empty.
    pub fn cell(&self, column: &str) -> String {
        match column {
            columns::ID => self.id.clone(),
            columns::COUNTRY => self.country.clone(),
            columns::PERIOD => self.period.format("%Y-%m-%d").to_string(),
            columns::VALUE => self.value.map(|v| v.to_string()).unwrap_or_default(),
            columns::STATUS => self.status.clone().unwrap_or_default(),
            columns::DESCRIPTION => self.description.clone().unwrap_or_default(),
            other => self.attributes.get(other).cloned().unwrap_or_default(),
        }
    }
}

/// Where a result table came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    Live,
    Cache,
}

/// Final flat result: deduplicated by (ID, COUNTRY, PERIOD) and sorted by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<ResultRow>,
    pub source: DataSource,
}

impl ResultTable {
    /// Build a table from rows already in final order, deriving the column list:
    /// core columns first, then every attribute column in lexicographic order.
    pub fn from_rows(rows: Vec<ResultRow>, source: DataSource) -> Self {
        let mut extra: Vec<String> = rows
            .iter()
            .flat_map(|r| r.attributes.keys())
            .filter(|k| !columns::CORE.contains(&k.as_str()))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut cols: Vec<String> = columns::CORE.iter().map(|c| c.to_string()).collect();
        cols.append(&mut extra);
        Self {
            columns: cols,
            rows,
            source,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn time_periods_parse_to_period_start() {
        assert_eq!(parse_time_period("2001"), Some(d(2001, 1, 1)));
        assert_eq!(parse_time_period("2001-Q3"), Some(d(2001, 7, 1)));
        assert_eq!(parse_time_period("2001Q4"), Some(d(2001, 10, 1)));
        assert_eq!(parse_time_period("2001-11"), Some(d(2001, 11, 1)));
        assert_eq!(parse_time_period("2001-11-05"), Some(d(2001, 11, 5)));
        assert_eq!(parse_time_period("2001-Q5"), None);
        assert_eq!(parse_time_period("20x1"), None);
        assert_eq!(parse_time_period(""), None);
    }

    #[test]
    fn truncate_to_frequency() {
        let date = d(2010, 8, 17);
        assert_eq!(Frequency::Annual.truncate(date), d(2010, 1, 1));
        assert_eq!(Frequency::Quarterly.truncate(date), d(2010, 7, 1));
        assert_eq!(Frequency::Monthly.truncate(date), d(2010, 8, 1));
    }

    #[test]
    fn column_names_are_normalized() {
        assert_eq!(normalize_column_name("@OBS_VALUE"), "OBS_VALUE");
        assert_eq!(normalize_column_name("Description.#text"), "DESCRIPTION_TEXT");
        assert_eq!(normalize_column_name("@xml:lang"), "XML_LANG");
        assert_eq!(normalize_column_name("unit mult"), "UNIT_MULT");
    }

    #[test]
    fn codelist_keeps_first_of_duplicate_codes() {
        let cl = Codelist::new(
            "CL_FREQ",
            vec![
                CodeEntry::new("A", "Annual"),
                CodeEntry::new("Q", "Quarterly"),
                CodeEntry::new("A", "Again"),
            ],
        );
        assert_eq!(cl.len(), 2);
        assert_eq!(cl.first().unwrap().description, "Annual");
        assert!(cl.contains("Q"));
    }

    #[test]
    fn meta_columns_include_codelist_extras() {
        let mut e = CodeEntry::new("NGDP_R_SA_XDC", "Gross Domestic Product, Real");
        e.attributes
            .insert("DESCRIPTION_XML_LANG".to_string(), "en".to_string());
        let meta = MetadataTable {
            dataset: "IFS".into(),
            codelist: "CL_INDICATOR_IFS".into(),
            entries: vec![e, CodeEntry::new("PCPI_IX", "Consumer Prices")],
        };
        assert_eq!(meta.columns(), vec!["ID", "DESCRIPTION", "DESCRIPTION_XML_LANG"]);
        assert!(meta.entries[0].matches("EN"));
        assert!(!meta.entries[1].matches("en"));
    }

    #[test]
    fn table_columns_put_core_first() {
        let mut attrs = BTreeMap::new();
        attrs.insert("UNIT_MULT".to_string(), "6".to_string());
        attrs.insert("BASE_YEAR".to_string(), "2010".to_string());
        let row = ResultRow {
            id: "X".into(),
            country: "US".into(),
            period: d(2000, 1, 1),
            value: Some(1.5),
            status: None,
            description: None,
            attributes: attrs,
        };
        let t = ResultTable::from_rows(vec![row], DataSource::Live);
        assert_eq!(
            t.columns,
            vec!["ID", "COUNTRY", "PERIOD", "VALUE", "STATUS", "DESCRIPTION", "BASE_YEAR", "UNIT_MULT"]
        );
        assert_eq!(t.rows[0].cell("PERIOD"), "2000-01-01");
        assert_eq!(t.rows[0].cell("UNIT_MULT"), "6");
        assert_eq!(t.rows[0].cell("STATUS"), "");
    }
}
