//! imfdata
//!
//! A Rust client for the IMF SDMX-JSON data service. Pairs with the `imfdata` CLI.
//!
//! ### Features
//! - Discover datasets, their key structure and the valid codes of each dimension
//! - Resolve free-text search terms to indicator codes
//! - Validate periods, countries and year ranges against the resolved codelists
//! - Fetch observations in small indicator chunks and normalize every response
//!   shape into one flat, deduplicated, sorted table
//! - Fall back to CSV snapshots on disk when the service is unavailable
//!
//! ### Example
//! ```no_run
//! use imfdata::Query;
//!
//! let mut q = Query::builder("IFS")
//!     .search_terms(["NGDP_R_SA_XDC"])
//!     .countries(["US"])
//!     .period("Q")
//!     .build()?;
//! let table = q.download_data()?;
//! imfdata::storage::save_table(table, "ngdp_us.csv")?;
//! for s in q.describe_data() {
//!     println!("{:?}", s);
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod config;
pub mod error;
pub mod fetch;
pub mod metadata;
pub mod models;
pub mod query;
pub mod report;
pub mod request;
pub mod sdmx;
pub mod stats;
pub mod storage;
pub mod validate;

pub use config::{DatasetConfig, Settings};
pub use error::QueryError;
pub use models::{MetadataTable, ResultRow, ResultTable};
pub use query::{Query, QueryBuilder};
pub use report::{LogReporter, RecordingReporter, Reporter};
