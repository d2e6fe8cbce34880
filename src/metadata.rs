//! Metadata resolution: dataset catalog, key structure, codelists and the
//! search-term to indicator-code lookup.
//!
//! Every live lookup that succeeds is snapshotted to the cache; a lookup that
//! fails reads the snapshot back. Only a missing dataset, a missing key
//! structure and a search that matches nothing stop the query.

use crate::config::{DatasetConfig, Settings};
use crate::error::QueryError;
use crate::models::{
    CodeEntry, Codelist, DatasetDescriptor, DatasetStructure, DimensionDescriptor, Frequency,
    MetadataTable,
};
use crate::report::Reporter;
use crate::request::{Requester, encode_segment};
use crate::sdmx;
use crate::storage::{self, CacheStore};
use std::collections::BTreeMap;

/// Codelists resolved for a dataset, keyed by codelist id. A dimension whose
/// codelist could not be resolved live or from cache is simply absent.
pub type Codelists = BTreeMap<String, Codelist>;

pub struct Resolver<'a> {
    requester: &'a Requester,
    settings: &'a Settings,
    store: &'a CacheStore,
    reporter: &'a dyn Reporter,
}

impl<'a> Resolver<'a> {
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

    /// Full catalog sorted by dataset code, live or from the last snapshot.
    pub fn catalog(&self) -> Option<Vec<DatasetDescriptor>> {
        let url = self.settings.endpoint("Dataflow");
        let live = self
            .requester
            .request(&url, self.reporter)
            .map_err(|f| f.to_string())
            .and_then(|doc| sdmx::parse_dataflows(&doc).map_err(|e| format!("{e:#}")));
        match live {
            Ok(mut datasets) => {
                sort_catalog(&mut datasets);
                let path = self.store.catalog_path();
                if let Err(e) = storage::write_with(self.store, &path, |p| {
                    storage::save_catalog(&datasets, p)
                }) {
                    self.reporter.warn(&format!("could not snapshot catalog: {e:#}"));
                }
                Some(datasets)
            }
            Err(why) => {
                self.reporter
                    .warn(&format!("failed to download dataset catalog: {why}"));
                match storage::load_catalog(self.store.catalog_path()) {
                    Ok(Some(mut datasets)) => {
                        self.reporter.info("using cached dataset catalog");
                        sort_catalog(&mut datasets);
                        Some(datasets)
                    }
                    Ok(None) => None,
                    Err(e) => {
                        self.reporter
                            .warn(&format!("cached dataset catalog unreadable: {e:#}"));
                        None
                    }
                }
            }
        }
    }

    /// Datasets whose code, name or flow id contains `filter` (case-insensitive).
    pub fn list_datasets(&self, filter: &str) -> Result<Vec<DatasetDescriptor>, QueryError> {
        let not_found = || QueryError::DatasetNotFound {
            filter: filter.to_string(),
        };
        let Some(catalog) = self.catalog() else {
            self.reporter.error(&not_found().to_string());
            return Err(not_found());
        };
        let matches = filter_catalog(catalog, filter);
        if matches.is_empty() {
            self.reporter.error(&not_found().to_string());
            return Err(not_found());
        }
        let path = self.store.filtered_catalog_path(filter);
        if let Err(e) = storage::write_with(self.store, &path, |p| storage::save_catalog(&matches, p))
        {
            self.reporter
                .warn(&format!("could not snapshot filtered catalog: {e:#}"));
        }
        self.reporter.info(&format!(
            "{} dataset(s) match '{filter}': {}",
            matches.len(),
            matches.iter().map(|d| d.code.as_str()).collect::<Vec<_>>().join(", ")
        ));
        Ok(matches)
    }

    /// Key structure of a dataset, with the indicator, area and frequency
    /// dimensions located by codelist name.
    pub fn list_dimensions(&self, config: &DatasetConfig) -> Result<DatasetStructure, QueryError> {
        let dataset = config.code.clone();
        let url = self
            .settings
            .endpoint(&format!("DataStructure/{}", encode_segment(&dataset)));
        let unavailable = || QueryError::DimensionsUnavailable {
            dataset: dataset.clone(),
        };
        let doc = self.requester.request(&url, self.reporter).map_err(|f| {
            self.reporter.error(&format!("{}: {f}", unavailable()));
            unavailable()
        })?;
        let parsed = sdmx::parse_dimensions(&doc).map_err(|e| {
            self.reporter.error(&format!("{}: {e:#}", unavailable()));
            unavailable()
        })?;

        let mut dims: Vec<_> = parsed;
        dims.sort_by_key(|(d, _)| d.position);
        for (d, _) in &dims {
            self.reporter
                .info(&format!("{dataset} dimension {}: {}", d.position, d.codelist));
        }

        let Some(indicator_position) = position_of(&dims, |c| config.is_indicator_codelist(c))
        else {
            let err = QueryError::IndicatorDimensionMissing {
                dataset: dataset.clone(),
            };
            self.reporter.error(&err.to_string());
            return Err(err);
        };
        let area_position = position_of(&dims, |c| config.is_area_codelist(c));
        let frequency_position = dims
            .iter()
            .find(|(_, flagged)| *flagged)
            .map(|(d, _)| d.position)
            .or_else(|| position_of(&dims, |c| config.is_frequency_codelist(c)));

        Ok(DatasetStructure {
            dataset,
            dimensions: dims.into_iter().map(|(d, _)| d).collect(),
            indicator_position,
            area_position,
            frequency_position,
        })
    }

    /// Codelist of the dimension at `position`; `None` if it is unavailable
    /// both live and in the cache.
    pub fn list_codes(&self, structure: &DatasetStructure, position: usize) -> Option<Codelist> {
        let dim = structure.dimension(position)?;
        if structure.frequency_position == Some(position) {
            return Some(self.frequency_codes(&structure.dataset, &dim.codelist));
        }
        self.codelist(&dim.codelist)
    }

    /// Every resolvable codelist of the dataset.
    pub fn list_all_codes(&self, structure: &DatasetStructure) -> Codelists {
        structure
            .dimensions
            .iter()
            .filter_map(|d| self.list_codes(structure, d.position))
            .map(|cl| (cl.id.clone(), cl))
            .collect()
    }

    fn codelist(&self, id: &str) -> Option<Codelist> {
        let url = self
            .settings
            .endpoint(&format!("CodeList/{}", encode_segment(id)));
        let live = self
            .requester
            .request(&url, self.reporter)
            .map_err(|f| f.to_string())
            .and_then(|doc| sdmx::parse_codelist(id, &doc).map_err(|e| format!("{e:#}")));
        match live {
            Ok(cl) if !cl.is_empty() => {
                self.snapshot_codelist(&cl);
                Some(cl)
            }
            Ok(_) => {
                self.reporter.warn(&format!("codelist {id} is empty"));
                self.cached_codelist(id)
            }
            Err(why) => {
                self.reporter
                    .warn(&format!("failed to download codelist {id}: {why}"));
                self.cached_codelist(id)
            }
        }
    }

    // The service does not serve the frequency codelist reliably through
    // CodeList/, so the dataset's GenericMetadata is tried first.
    fn frequency_codes(&self, dataset: &str, id: &str) -> Codelist {
        let url = self
            .settings
            .endpoint(&format!("GenericMetadata/{}", encode_segment(dataset)));
        if let Ok(doc) = self.requester.request(&url, self.reporter) {
            let codes = sdmx::parse_frequency_codes(&doc);
            if !codes.is_empty() {
                let cl = Codelist::new(
                    id,
                    codes.into_iter().map(|c| {
                        let label = Frequency::from_code(&c)
                            .map(|f| f.label().to_string())
                            .unwrap_or_else(|| c.clone());
                        CodeEntry::new(c, label)
                    }),
                );
                self.snapshot_codelist(&cl);
                return cl;
            }
        }
        if let Some(cl) = self.codelist(id) {
            return cl;
        }
        self.reporter.warn(&format!(
            "frequency codelist {id} unavailable; assuming annual, quarterly and monthly"
        ));
        Codelist::new(
            id,
            [Frequency::Annual, Frequency::Quarterly, Frequency::Monthly]
                .into_iter()
                .map(|f| CodeEntry::new(f.code(), f.label())),
        )
    }

    fn snapshot_codelist(&self, cl: &Codelist) {
        let path = self.store.codelist_path(&cl.id);
        if let Err(e) = storage::write_with(self.store, &path, |p| storage::save_codes(&cl.entries, p))
        {
            self.reporter
                .warn(&format!("could not snapshot codelist {}: {e:#}", cl.id));
        }
    }

    fn cached_codelist(&self, id: &str) -> Option<Codelist> {
        match storage::load_codelist(id, self.store.codelist_path(id)) {
            Ok(Some(cl)) => {
                self.reporter.info(&format!("using cached codelist {id}"));
                Some(cl)
            }
            Ok(None) => {
                self.reporter
                    .warn(&format!("codelist {id} unavailable; its dimension is not validated"));
                None
            }
            Err(e) => {
                self.reporter
                    .warn(&format!("cached codelist {id} unreadable: {e:#}"));
                None
            }
        }
    }

    /// Indicator codes whose code or description contains any of
    /// `search_terms`. No terms selects the whole indicator codelist.
    pub fn resolve_indicators(
        &self,
        structure: &DatasetStructure,
        codelists: &Codelists,
        search_terms: &[String],
    ) -> Result<MetadataTable, QueryError> {
        let codelist_id = structure.indicator_codelist().unwrap_or_default().to_string();
        let codelist = match codelists.get(&codelist_id) {
            Some(cl) => cl.clone(),
            None => self
                .list_codes(structure, structure.indicator_position)
                .ok_or_else(|| {
                    let err = QueryError::CodelistUnavailable {
                        codelist: codelist_id.clone(),
                    };
                    self.reporter.error(&err.to_string());
                    err
                })?,
        };
        let table = filter_indicators(&structure.dataset, &codelist, search_terms);
        if table.is_empty() {
            let err = QueryError::SearchTermsNotFound {
                dataset: structure.dataset.clone(),
                codelist: codelist_id,
                terms: search_terms.to_vec(),
            };
            self.reporter.error(&err.to_string());
            return Err(err);
        }
        self.reporter.info(&format!(
            "{} indicator(s) of {} match {:?}",
            table.len(),
            structure.dataset,
            search_terms
        ));
        Ok(table)
    }
}

fn position_of(dims: &[(DimensionDescriptor, bool)], pred: impl Fn(&str) -> bool) -> Option<usize> {
    dims.iter()
        .find(|(d, _)| pred(&d.codelist))
        .map(|(d, _)| d.position)
}

fn sort_catalog(datasets: &mut [DatasetDescriptor]) {
    datasets.sort_by(|a, b| a.code.cmp(&b.code).then_with(|| a.flow_id.cmp(&b.flow_id)));
}

/// Keep datasets with `filter` in any text field.
pub fn filter_catalog(catalog: Vec<DatasetDescriptor>, filter: &str) -> Vec<DatasetDescriptor> {
    let needle = filter.trim().to_lowercase();
    catalog
        .into_iter()
        .filter(|d| {
            [&d.code, &d.name, &d.flow_id]
                .iter()
                .any(|f| f.to_lowercase().contains(&needle))
        })
        .collect()
}

/// OR of the search terms over code and description; blank terms are ignored
/// and an empty term list matches everything.
pub fn filter_indicators(dataset: &str, codelist: &Codelist, search_terms: &[String]) -> MetadataTable {
    let terms: Vec<&str> = search_terms
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    let entries = codelist
        .entries
        .iter()
        .filter(|e| terms.is_empty() || terms.iter().any(|t| e.matches(t)))
        .cloned()
        .collect();
    MetadataTable {
        dataset: dataset.to_string(),
        codelist: codelist.id.clone(),
        entries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indicators() -> Codelist {
        Codelist::new(
            "CL_INDICATOR_IFS",
            vec![
                CodeEntry::new("NGDP_R_SA_XDC", "Gross Domestic Product, Real, Seasonally Adjusted"),
                CodeEntry::new("NGDP_R_XDC", "Gross Domestic Product, Real, Domestic Currency"),
                CodeEntry::new("PCPI_IX", "Prices, Consumer Price Index, All items"),
            ],
        )
    }

    #[test]
    fn search_is_case_insensitive_and_ored() {
        let t = filter_indicators(
            "IFS",
            &indicators(),
            &["gross domestic product, REAL".into(), "pcpi".into()],
        );
        assert_eq!(t.ids(), vec!["NGDP_R_SA_XDC", "NGDP_R_XDC", "PCPI_IX"]);
    }

    #[test]
    fn codes_are_searchable_too() {
        let t = filter_indicators("IFS", &indicators(), &["NGDP_R_SA_XDC".into()]);
        assert_eq!(t.ids(), vec!["NGDP_R_SA_XDC"]);
        assert_eq!(t.codelist, "CL_INDICATOR_IFS");
    }

    #[test]
    fn no_terms_is_a_wildcard() {
        assert_eq!(filter_indicators("IFS", &indicators(), &[]).len(), 3);
        assert_eq!(filter_indicators("IFS", &indicators(), &["  ".into()]).len(), 3);
    }

    #[test]
    fn catalog_filter_checks_every_field() {
        let cat = vec![
            DatasetDescriptor {
                code: "IFS".into(),
                name: "International Financial Statistics (IFS)".into(),
                flow_id: "DS-IFS".into(),
            },
            DatasetDescriptor {
                code: "DOT".into(),
                name: "Direction of Trade Statistics (DOTS)".into(),
                flow_id: "DS-DOT".into(),
            },
        ];
        assert_eq!(filter_catalog(cat.clone(), "trade").len(), 1);
        assert_eq!(filter_catalog(cat.clone(), "ds-").len(), 2);
        assert!(filter_catalog(cat, "nothing").is_empty());
    }
}
