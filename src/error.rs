use thiserror::Error;

/// Failures that stop a query.
///
/// Everything else (transient request failures, malformed responses for a
/// single country/chunk, invalid inputs) is downgraded to a warning and never
/// surfaces here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("no dataset matches '{filter}'; consult the Dataflow catalog for valid dataset codes")]
    DatasetNotFound { filter: String },

    #[error("dimension structure of {dataset} is unavailable; consult DataStructure/{dataset}")]
    DimensionsUnavailable { dataset: String },

    #[error("no indicator dimension found in {dataset}; consult DataStructure/{dataset}")]
    IndicatorDimensionMissing { dataset: String },

    #[error("codelist {codelist} could not be retrieved; consult CodeList/{codelist}")]
    CodelistUnavailable { codelist: String },

    #[error(
        "search terms {terms:?} not found in {dataset}; consult CodeList/{codelist} for valid indicator descriptions"
    )]
    SearchTermsNotFound {
        dataset: String,
        codelist: String,
        terms: Vec<String>,
    },

    #[error("no data available for {dataset} (key signature {signature})")]
    NoData { dataset: String, signature: String },
}
