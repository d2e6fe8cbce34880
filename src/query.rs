//! The query context: one dataset, a search, a country list and a date range.
//!
//! ```no_run
//! use imfdata::Query;
//!
//! let mut q = Query::builder("IFS")
//!     .search_terms(["Gross Domestic Product, Real"])
//!     .countries(["US", "DE"])
//!     .period("Q")
//!     .start_date("2000")
//!     .end_date("2022")
//!     .build()?;
//! let rows = q.download_data()?.len();
//! println!("{rows} rows, {} indicators", q.get_meta().map_or(0, |m| m.len()));
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::config::{DatasetConfig, Settings};
use crate::error::QueryError;
use crate::fetch::Fetcher;
use crate::metadata::{Codelists, Resolver};
use crate::models::{DatasetDescriptor, DatasetStructure, MetadataTable, ResultTable};
use crate::report::{LogReporter, Reporter};
use crate::request::{HttpTransport, Requester, Transport};
use crate::stats::{self, ColumnSummary, Summary};
use crate::storage::{self, CacheStore, QuerySignature};
use crate::validate::{self, RawInputs, ValidatedInputs};
use anyhow::Result;
use std::rc::Rc;

pub const DEFAULT_COUNTRY: &str = "US";

pub struct QueryBuilder {
    dataset: String,
    search_terms: Vec<String>,
    countries: Option<Vec<String>>,
    period: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    settings: Option<Settings>,
    transport: Option<Box<dyn Transport>>,
    reporter: Option<Rc<dyn Reporter>>,
}

impl QueryBuilder {
    /// Terms matched against indicator codes and descriptions. None means all.
    pub fn search_terms<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_terms = terms.into_iter().map(Into::into).collect();
        self
    }

    pub fn countries<I, S>(mut self, countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.countries = Some(countries.into_iter().map(Into::into).collect());
        self
    }

    pub fn period(mut self, period: impl Into<String>) -> Self {
        self.period = Some(period.into());
        self
    }

    pub fn start_date(mut self, date: impl Into<String>) -> Self {
        self.start_date = Some(date.into());
        self
    }

    pub fn end_date(mut self, date: impl Into<String>) -> Self {
        self.end_date = Some(date.into());
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn reporter(mut self, reporter: Rc<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn build(self) -> Result<Query> {
        let settings = self.settings.unwrap_or_else(Settings::from_env).normalized();
        let transport = match self.transport {
            Some(t) => t,
            None => Box::new(HttpTransport::new(&settings)?),
        };
        let config = DatasetConfig::for_dataset(&self.dataset);
        let period = self
            .period
            .unwrap_or_else(|| config.default_period.code().to_string());
        Ok(Query {
            search_terms: self.search_terms,
            countries: self
                .countries
                .unwrap_or_else(|| vec![DEFAULT_COUNTRY.to_string()]),
            period,
            start_date: self.start_date,
            end_date: self.end_date,
            store: CacheStore::new(settings.cache_dir.clone(), settings.max_filename_len),
            requester: Requester::new(transport, &settings),
            reporter: self.reporter.unwrap_or_else(|| Rc::new(LogReporter)),
            config,
            settings,
            datasets: Vec::new(),
            structure: None,
            codelists: Codelists::new(),
            inputs: None,
            meta: None,
            data: None,
        })
    }
}

/// A query against one dataset. Each stage result is kept for inspection
/// after [`Query::download_data`].
pub struct Query {
    search_terms: Vec<String>,
    countries: Vec<String>,
    period: String,
    start_date: Option<String>,
    end_date: Option<String>,
    config: DatasetConfig,
    settings: Settings,
    store: CacheStore,
    requester: Requester,
    reporter: Rc<dyn Reporter>,

    datasets: Vec<DatasetDescriptor>,
    structure: Option<DatasetStructure>,
    codelists: Codelists,
    inputs: Option<ValidatedInputs>,
    meta: Option<MetadataTable>,
    data: Option<ResultTable>,
}

impl Query {
    pub fn builder(dataset: impl Into<String>) -> QueryBuilder {
        QueryBuilder {
            dataset: dataset.into(),
            search_terms: Vec::new(),
            countries: None,
            period: None,
            start_date: None,
            end_date: None,
            settings: None,
            transport: None,
            reporter: None,
        }
    }

    pub fn dataset(&self) -> &str {
        &self.config.code
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Metadata resolver sharing this query's transport, cache and reporter.
    pub fn resolver(&self) -> Resolver<'_> {
        Resolver::new(&self.requester, &self.settings, &self.store, &*self.reporter)
    }

    /// Run the whole pipeline: catalog, structure, codelists, validation,
    /// indicator search, observation fetch.
    pub fn download_data(&mut self) -> Result<&ResultTable, QueryError> {
        self.meta = None;
        self.data = None;
        let resolver = Resolver::new(&self.requester, &self.settings, &self.store, &*self.reporter);

        self.datasets = resolver.list_datasets(&self.config.code)?;
        let structure = resolver.list_dimensions(&self.config)?;
        let codelists = resolver.list_all_codes(&structure);

        let inputs = validate::validate(
            RawInputs {
                period: &self.period,
                countries: &self.countries,
                start_date: self.start_date.as_deref(),
                end_date: self.end_date.as_deref(),
            },
            &structure,
            &codelists,
            &*self.reporter,
        );

        let meta = resolver.resolve_indicators(&structure, &codelists, &self.search_terms)?;
        let signature = QuerySignature {
            dataset: &self.config.code,
            search_terms: &self.search_terms,
            countries: &inputs.countries,
            period: &inputs.period,
            start_year: inputs.start_year,
            end_year: inputs.end_year,
        };
        let meta_path = self.store.meta_path(&signature);
        if let Err(e) = storage::write_with(&self.store, &meta_path, |p| {
            storage::save_codes(&meta.entries, p)
        }) {
            self.reporter.warn(&format!("could not snapshot metadata: {e:#}"));
        }

        let fetcher = Fetcher::new(&self.requester, &self.settings, &self.store, &*self.reporter);
        let data = fetcher.fetch(&self.config, &structure, &meta, &inputs, &signature);
        let no_data = QueryError::NoData {
            dataset: self.config.code.clone(),
            signature: signature.stem(self.settings.max_filename_len),
        };

        self.structure = Some(structure);
        self.codelists = codelists;
        self.inputs = Some(inputs);
        self.meta = Some(meta);
        match data {
            Some(table) => Ok(&*self.data.insert(table)),
            None => Err(no_data),
        }
    }

    /// Indicators selected by the last download.
    pub fn get_meta(&self) -> Option<&MetadataTable> {
        self.meta.as_ref()
    }

    /// Result table of the last download.
    pub fn get_data(&self) -> Option<&ResultTable> {
        self.data.as_ref()
    }

    pub fn describe_data(&self) -> Vec<Summary> {
        self.data
            .as_ref()
            .map(|t| stats::describe_data(&t.rows))
            .unwrap_or_default()
    }

    pub fn describe_meta(&self) -> Vec<ColumnSummary> {
        self.meta
            .as_ref()
            .map(stats::describe_meta)
            .unwrap_or_default()
    }

    /// Catalog entries that matched the dataset code.
    pub fn datasets(&self) -> &[DatasetDescriptor] {
        &self.datasets
    }

    pub fn structure(&self) -> Option<&DatasetStructure> {
        self.structure.as_ref()
    }

    pub fn codelists(&self) -> &Codelists {
        &self.codelists
    }

    /// Inputs as corrected by validation.
    pub fn inputs(&self) -> Option<&ValidatedInputs> {
        self.inputs.as_ref()
    }
}
