//! Observation fetching and normalization.
//!
//! Indicator codes are split into small chunks so request keys stay short
//! enough for the service. One `CompactData` request is issued per
//! (country, chunk) pair, countries outermost. Each response is flattened into
//! [`Observation`]s whatever its shape, then everything is joined with the
//! indicator descriptions, deduplicated on (ID, COUNTRY, PERIOD) keeping the
//! last row seen, and sorted on the same key.

use crate::config::{DatasetConfig, Settings};
use crate::models::{
    DataSource, DatasetStructure, Frequency, MetadataTable, Observation, ResultRow, ResultTable,
    normalize_column_name, parse_time_period,
};
use crate::report::Reporter;
use crate::request::{RequestFailure, Requester, encode_segment};
use crate::sdmx::{self, RawSeries, scalar_text};
use crate::storage::{self, CacheStore, QuerySignature};
use crate::validate::ValidatedInputs;
use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const TIME_PERIOD: &str = "@TIME_PERIOD";
const OBS_VALUE: &str = "@OBS_VALUE";
const OBS_STATUS: &str = "@OBS_STATUS";
const REF_AREA: &str = "@REF_AREA";
const REF_SECTOR: &str = "@REF_SECTOR";
const INDICATOR_FIELDS: [&str; 2] = ["@INDICATOR", "@INDICATOR_CODE"];

/// What one (country, chunk) request contributed.
#[derive(Debug, Clone, PartialEq)]
pub enum PairOutcome {
    Rows(Vec<Observation>),
    /// The service answered but had no observations for this key.
    Empty,
    /// The response could not be flattened.
    Malformed(String),
    /// The request itself failed after all attempts.
    Unavailable(RequestFailure),
}

/// Split `ids` into consecutive chunks of at most `size` codes.
pub fn chunk_ids(ids: &[String], size: usize) -> Vec<Vec<String>> {
    ids.chunks(size.max(1)).map(<[String]>::to_vec).collect()
}

/// Composite request key: period, country and the `+`-joined indicator chunk,
/// each in its dimension's slot, followed by the optional year range.
///
/// A dataset without a detected area dimension gets no country slot; the
/// indicator slot always wins over an assumed frequency position.
pub fn build_key(
    structure: &DatasetStructure,
    period: &str,
    country: &str,
    chunk: &[String],
    start_year: Option<i32>,
    end_year: Option<i32>,
) -> String {
    let ind_pos = structure.indicator_position;
    let freq_pos = structure
        .frequency_position
        .or((ind_pos != 1).then_some(1))
        .unwrap_or(0);
    let area_pos = structure.area_position.unwrap_or(0);
    let width = freq_pos.max(area_pos).max(ind_pos);

    let ids = chunk
        .iter()
        .map(|id| encode_segment(id))
        .collect::<Vec<_>>()
        .join("+");
    let slots: Vec<String> = (1..=width)
        .map(|pos| {
            if pos == ind_pos {
                ids.clone()
            } else if pos == area_pos {
                encode_segment(country)
            } else if pos == freq_pos {
                encode_segment(period)
            } else {
                String::new()
            }
        })
        .collect();
    let mut key = slots.join(".");

    let mut range = Vec::new();
    if let Some(y) = start_year {
        range.push(format!("startPeriod={y}"));
    }
    if let Some(y) = end_year {
        range.push(format!("endPeriod={y}"));
    }
    if !range.is_empty() {
        key.push_str(".?");
        key.push_str(&range.join("&"));
    }
    key
}

pub fn data_url(settings: &Settings, dataset: &str, key: &str) -> String {
    settings.endpoint(&format!("CompactData/{}/{}", encode_segment(dataset), key))
}

/// Flatten one `CompactData` document.
///
/// Series attributes are broadcast onto every observation of the series;
/// observation attributes win on a name clash. A series without the
/// `@REF_AREA` attribute belongs to `country`.
pub fn parse_observations(
    doc: &Value,
    config: &DatasetConfig,
    country: &str,
    freq: Option<Frequency>,
) -> PairOutcome {
    let series = match sdmx::parse_compact_data(doc) {
        Ok(s) => s,
        Err(e) => return PairOutcome::Malformed(format!("{e:#}")),
    };
    let mut rows = Vec::new();
    for (n, s) in series.iter().enumerate() {
        match flatten_series(s, config, country, freq) {
            Ok(mut obs) => rows.append(&mut obs),
            Err(why) => return PairOutcome::Malformed(format!("series {}: {why}", n + 1)),
        }
    }
    if rows.is_empty() {
        PairOutcome::Empty
    } else {
        PairOutcome::Rows(rows)
    }
}

fn flatten_series(
    series: &RawSeries,
    config: &DatasetConfig,
    country: &str,
    freq: Option<Frequency>,
) -> Result<Vec<Observation>, String> {
    let obs = match &series.obs {
        Some(o) => o.clone().into_vec(),
        None => return Ok(Vec::new()),
    };
    if obs.is_empty() {
        return Ok(Vec::new());
    }

    let attrs = &series.attributes;
    let id_field = INDICATOR_FIELDS
        .iter()
        .copied()
        .find(|f| attrs.contains_key(*f))
        .or_else(|| {
            (config.sector_as_indicator && attrs.contains_key(REF_SECTOR)).then_some(REF_SECTOR)
        })
        .ok_or_else(|| "no indicator attribute".to_string())?;
    let id = attrs.get(id_field).and_then(scalar_text).ok_or("indicator is not text")?;
    let country = attrs
        .get(REF_AREA)
        .and_then(scalar_text)
        .unwrap_or_else(|| country.to_string());

    let broadcast: BTreeMap<String, String> = attrs
        .iter()
        .filter(|(k, _)| k.as_str() != id_field && k.as_str() != REF_AREA)
        .filter_map(|(k, v)| scalar_text(v).map(|v| (normalize_column_name(k), v)))
        .collect();

    obs.iter()
        .map(|o| observation(o, &id, &country, &broadcast, freq))
        .collect()
}

fn observation(
    obs: &Map<String, Value>,
    id: &str,
    country: &str,
    broadcast: &BTreeMap<String, String>,
    freq: Option<Frequency>,
) -> Result<Observation, String> {
    let raw_period = obs
        .get(TIME_PERIOD)
        .and_then(scalar_text)
        .ok_or("observation without time period")?;
    let period = parse_time_period(&raw_period)
        .ok_or_else(|| format!("unparsable time period '{raw_period}'"))?;
    let period = freq.map_or(period, |f| f.truncate(period));

    let value = obs.get(OBS_VALUE).and_then(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    });
    let status = obs.get(OBS_STATUS).and_then(scalar_text);

    let mut attributes = broadcast.clone();
    for (k, v) in obs {
        if matches!(k.as_str(), TIME_PERIOD | OBS_VALUE | OBS_STATUS) {
            continue;
        }
        if let Some(v) = scalar_text(v) {
            attributes.insert(normalize_column_name(k), v);
        }
    }

    Ok(Observation {
        id: id.to_string(),
        country: country.to_string(),
        period,
        value,
        status,
        attributes,
    })
}

/// Left-join observations with `meta`, keep the last row per
/// (ID, COUNTRY, PERIOD) and sort by that key.
///
/// Every codelist column of the matching indicator is joined in; a data
/// attribute of the same name wins.
pub fn normalize(observations: Vec<Observation>, meta: &MetadataTable) -> ResultTable {
    let mut merged: BTreeMap<(String, String, NaiveDate), ResultRow> = BTreeMap::new();
    for o in observations {
        let entry = meta.entry(&o.id);
        let mut attributes = o.attributes;
        for (k, v) in entry.into_iter().flat_map(|e| &e.attributes) {
            attributes.entry(k.clone()).or_insert_with(|| v.clone());
        }
        let row = ResultRow {
            description: entry.map(|e| e.description.clone()),
            id: o.id,
            country: o.country,
            period: o.period,
            value: o.value,
            status: o.status,
            attributes,
        };
        merged.insert((row.id.clone(), row.country.clone(), row.period), row);
    }
    ResultTable::from_rows(merged.into_values().collect(), DataSource::Live)
}

pub struct Fetcher<'a> {
    requester: &'a Requester,
    settings: &'a Settings,
    store: &'a CacheStore,
    reporter: &'a dyn Reporter,
}

impl<'a> Fetcher<'a> {
    pub fn new(
        requester: &'a Requester,
        settings: &'a Settings,
        store: &'a CacheStore,
        reporter: &'a dyn Reporter,
    ) -> Self {
        Self {
            requester,
            settings,
            store,
            reporter,
        }
    }

    /// Fetch every (country, chunk) pair and normalize the result.
    ///
    /// Falls back to the snapshot for `signature` when nothing live came
    /// back; `None` means there is no data at all.
    pub fn fetch(
        &self,
        config: &DatasetConfig,
        structure: &DatasetStructure,
        meta: &MetadataTable,
        inputs: &ValidatedInputs,
        signature: &QuerySignature<'_>,
    ) -> Option<ResultTable> {
        let chunks = chunk_ids(&meta.ids(), self.settings.chunk_size);
        let freq = Frequency::from_code(&inputs.period);
        if structure.area_position.is_none() {
            self.reporter.warn(&format!(
                "{} has no area dimension; request keys carry no country",
                config.code
            ));
        }
        let mut observations = Vec::new();

        for country in &inputs.countries {
            for chunk in &chunks {
                let key = build_key(
                    structure,
                    &inputs.period,
                    country,
                    chunk,
                    inputs.start_year,
                    inputs.end_year,
                );
                let url = data_url(self.settings, &config.code, &key);
                let outcome = match self.requester.request(&url, self.reporter) {
                    Ok(doc) => parse_observations(&doc, config, country, freq),
                    Err(f) => PairOutcome::Unavailable(f),
                };
                match outcome {
                    PairOutcome::Rows(mut rows) => {
                        self.reporter
                            .info(&format!("{key}: {} observation(s)", rows.len()));
                        observations.append(&mut rows);
                    }
                    PairOutcome::Empty => self.reporter.info(&format!("{key}: no observations")),
                    PairOutcome::Malformed(why) => {
                        self.reporter.warn(&format!("{key}: malformed response: {why}"))
                    }
                    PairOutcome::Unavailable(f) => self.reporter.warn(&format!("{key}: {f}")),
                }
            }
        }

        let path = self.store.data_path(signature);
        if observations.is_empty() {
            return match storage::load_table(&path) {
                Ok(Some(table)) => {
                    self.reporter.warn(&format!(
                        "no live data for {}; using snapshot {}",
                        config.code,
                        path.display()
                    ));
                    Some(table)
                }
                Ok(None) => {
                    self.reporter
                        .warn(&format!("no data available for {}", config.code));
                    None
                }
                Err(e) => {
                    self.reporter.warn(&format!(
                        "no live data for {} and snapshot unreadable: {e:#}",
                        config.code
                    ));
                    None
                }
            };
        }

        let table = normalize(observations, meta);
        if let Err(e) = storage::write_with(self.store, &path, |p| storage::save_table(&table, p)) {
            self.reporter.warn(&format!("could not snapshot data: {e:#}"));
        }
        self.reporter.info(&format!(
            "{}: {} row(s), {} column(s)",
            config.code,
            table.len(),
            table.column_count()
        ));
        Some(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CodeEntry, DimensionDescriptor};
    use serde_json::json;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("IND{i}")).collect()
    }

    fn structure(indicator_position: usize) -> DatasetStructure {
        DatasetStructure {
            dataset: "X".into(),
            dimensions: (1..=indicator_position)
                .map(|position| DimensionDescriptor {
                    position,
                    codelist: format!("CL_{position}"),
                    concept: None,
                })
                .collect(),
            indicator_position,
            area_position: Some(2),
            frequency_position: Some(1),
        }
    }

    #[test]
    fn chunks_cover_every_id_once() {
        for n in [0usize, 1, 4, 5, 6, 11] {
            let all = ids(n);
            let chunks = chunk_ids(&all, 5);
            assert_eq!(chunks.len(), n.div_ceil(5));
            let flat: Vec<String> = chunks.concat();
            assert_eq!(flat, all);
        }
    }

    #[test]
    fn key_places_indicators_in_their_slot() {
        let chunk = vec!["A".to_string(), "B".to_string()];
        assert_eq!(build_key(&structure(3), "Q", "US", &chunk, None, None), "Q.US.A+B");
        assert_eq!(build_key(&structure(5), "A", "DE", &chunk, None, None), "A.DE...A+B");
        assert_eq!(
            build_key(&structure(3), "Q", "US", &chunk, Some(2000), Some(2022)),
            "Q.US.A+B.?startPeriod=2000&endPeriod=2022"
        );
        assert_eq!(
            build_key(&structure(3), "Q", "US", &chunk, None, Some(2022)),
            "Q.US.A+B.?endPeriod=2022"
        );
    }

    #[test]
    fn missing_area_dimension_leaves_no_country_slot() {
        let chunk = vec!["A".to_string(), "B".to_string()];
        let mut s = structure(2);
        s.area_position = None;
        assert_eq!(build_key(&s, "Q", "US", &chunk, None, None), "Q.A+B");

        s.frequency_position = None;
        s.indicator_position = 1;
        assert_eq!(build_key(&s, "Q", "US", &chunk, Some(2001), None), "A+B.?startPeriod=2001");
    }

    #[test]
    fn quarterly_series_flatten_with_broadcast_attributes() {
        let doc = json!({"CompactData": {"DataSet": {"Series": {
            "@FREQ": "Q", "@REF_AREA": "US", "@INDICATOR": "NGDP_R_SA_XDC",
            "@UNIT_MULT": "6", "@TIME_FORMAT": "P3M",
            "Obs": [
                {"@TIME_PERIOD": "2000-Q1", "@OBS_VALUE": "12935252"},
                {"@TIME_PERIOD": "2000-Q2", "@OBS_VALUE": "13170749", "@OBS_STATUS": "E"}
            ]
        }}}});
        let cfg = DatasetConfig::for_dataset("IFS");
        let PairOutcome::Rows(rows) =
            parse_observations(&doc, &cfg, "US", Some(Frequency::Quarterly))
        else {
            panic!("expected rows");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].period, NaiveDate::from_ymd_opt(2000, 4, 1).unwrap());
        assert_eq!(rows[1].value, Some(13170749.0));
        assert_eq!(rows[1].status.as_deref(), Some("E"));
        assert_eq!(rows[0].attributes.get("UNIT_MULT").map(String::as_str), Some("6"));
        assert_eq!(rows[0].attributes.get("FREQ").map(String::as_str), Some("Q"));
        assert!(!rows[0].attributes.contains_key("INDICATOR"));
    }

    #[test]
    fn sector_is_the_indicator_for_sector_keyed_datasets() {
        let doc = json!({"CompactData": {"DataSet": {"Series": [{
            "@REF_AREA": "US", "@REF_SECTOR": "S1311",
            "Obs": {"@TIME_PERIOD": "2001", "@OBS_VALUE": "3.5"}
        }]}}});
        let gfsr = DatasetConfig::for_dataset("GFSR");
        let PairOutcome::Rows(rows) = parse_observations(&doc, &gfsr, "US", Some(Frequency::Annual))
        else {
            panic!("expected rows");
        };
        assert_eq!(rows[0].id, "S1311");

        let ifs = DatasetConfig::for_dataset("IFS");
        assert!(matches!(
            parse_observations(&doc, &ifs, "US", None),
            PairOutcome::Malformed(_)
        ));
    }

    #[test]
    fn series_without_obs_is_empty_not_malformed() {
        let doc = json!({"CompactData": {"DataSet": {"Series": {
            "@REF_AREA": "US", "@INDICATOR": "X"
        }}}});
        let cfg = DatasetConfig::for_dataset("IFS");
        assert_eq!(parse_observations(&doc, &cfg, "US", None), PairOutcome::Empty);
    }

    #[test]
    fn missing_area_inherits_requested_country() {
        let doc = json!({"CompactData": {"DataSet": {"Series": {
            "@INDICATOR_CODE": "X",
            "Obs": [{"@TIME_PERIOD": "2001-03", "@OBS_VALUE": 1}]
        }}}});
        let cfg = DatasetConfig::for_dataset("IFS");
        let PairOutcome::Rows(rows) = parse_observations(&doc, &cfg, "DE", Some(Frequency::Monthly))
        else {
            panic!("expected rows");
        };
        assert_eq!(rows[0].country, "DE");
        assert_eq!(rows[0].value, Some(1.0));
    }

    #[test]
    fn normalize_joins_dedups_and_sorts() {
        let ob = |id: &str, country: &str, year: i32, v: f64| Observation {
            id: id.into(),
            country: country.into(),
            period: NaiveDate::from_ymd_opt(year, 1, 1).unwrap(),
            value: Some(v),
            status: None,
            attributes: BTreeMap::new(),
        };
        let meta = MetadataTable {
            dataset: "IFS".into(),
            codelist: "CL_INDICATOR_IFS".into(),
            entries: vec![CodeEntry::new("B", "Bravo")],
        };
        let t = normalize(
            vec![
                ob("B", "US", 2001, 1.0),
                ob("A", "US", 2000, 2.0),
                ob("B", "US", 2001, 3.0),
                ob("B", "DE", 2001, 4.0),
            ],
            &meta,
        );
        let keys: Vec<_> = t.rows.iter().map(|r| (r.id.as_str(), r.country.as_str())).collect();
        assert_eq!(keys, vec![("A", "US"), ("B", "DE"), ("B", "US")]);
        assert_eq!(t.rows[2].value, Some(3.0));
        assert_eq!(t.rows[0].description, None);
        assert_eq!(t.rows[1].description.as_deref(), Some("Bravo"));
    }

    #[test]
    fn normalize_joins_every_codelist_column() {
        let mut entry = CodeEntry::new("B", "Bravo");
        entry
            .attributes
            .insert("DESCRIPTION_XML_LANG".to_string(), "en".to_string());
        entry.attributes.insert("UNIT_MULT".to_string(), "0".to_string());
        let meta = MetadataTable {
            dataset: "IFS".into(),
            codelist: "CL_INDICATOR_IFS".into(),
            entries: vec![entry],
        };
        let mut attributes = BTreeMap::new();
        attributes.insert("UNIT_MULT".to_string(), "6".to_string());
        let o = Observation {
            id: "B".into(),
            country: "US".into(),
            period: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
            value: Some(1.0),
            status: None,
            attributes,
        };
        let t = normalize(vec![o], &meta);
        assert_eq!(t.rows[0].cell("DESCRIPTION_XML_LANG"), "en");
        assert_eq!(t.rows[0].cell("UNIT_MULT"), "6");
        assert!(t.columns.iter().any(|c| c == "DESCRIPTION_XML_LANG"));
    }
}
