//! Input validation against resolved codelists.
//!
//! Nothing here fails a query: invalid inputs are replaced and a warning is
//! reported for each replacement.

use crate::metadata::Codelists;
use crate::models::DatasetStructure;
use crate::report::Reporter;
use regex::Regex;
use std::sync::OnceLock;

/// Inputs after correction. Years are `None` when unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedInputs {
    pub period: String,
    pub countries: Vec<String>,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
}

/// Raw user inputs for one query.
#[derive(Debug, Clone, Copy)]
pub struct RawInputs<'a> {
    pub period: &'a str,
    pub countries: &'a [String],
    pub start_date: Option<&'a str>,
    pub end_date: Option<&'a str>,
}

pub fn validate(
    inputs: RawInputs<'_>,
    structure: &DatasetStructure,
    codelists: &Codelists,
    reporter: &dyn Reporter,
) -> ValidatedInputs {
    let freq = structure.frequency_codelist().and_then(|id| codelists.get(id));
    let area = structure.area_codelist().and_then(|id| codelists.get(id));

    let mut period = inputs.period.trim().to_ascii_uppercase();
    if let Some(cl) = freq {
        if !cl.contains(&period) {
            if let Some(first) = cl.first() {
                reporter.warn(&format!(
                    "period '{period}' is not valid for {}; using '{}' ({})",
                    structure.dataset, first.value, first.description
                ));
                period = first.value.clone();
            }
        }
    }

    let mut countries: Vec<String> = inputs
        .countries
        .iter()
        .map(|c| c.trim().to_ascii_uppercase())
        .filter(|c| !c.is_empty())
        .collect();
    if let Some(cl) = area {
        countries.retain(|c| {
            let ok = cl.contains(c);
            if !ok {
                reporter.warn(&format!(
                    "country '{c}' is not in {}; dropping it",
                    cl.id
                ));
            }
            ok
        });
        if countries.is_empty() {
            if let Some(first) = cl.first() {
                reporter.warn(&format!(
                    "no valid country left; using '{}' ({})",
                    first.value, first.description
                ));
                countries.push(first.value.clone());
            }
        }
    }

    ValidatedInputs {
        period,
        countries,
        start_year: year_bound(inputs.start_date, "start", reporter),
        end_year: year_bound(inputs.end_date, "end", reporter),
    }
}

fn year_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4})(?:$|[-/])").expect("valid year regex"))
}

/// Leading four-digit year of a date string. Blank or absent means
/// unbounded; anything else that does not start with a year is dropped
/// with a warning.
fn year_bound(date: Option<&str>, side: &str, reporter: &dyn Reporter) -> Option<i32> {
    let date = date.map(str::trim).filter(|d| !d.is_empty())?;
    let year = year_pattern()
        .captures(date)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok());
    if year.is_none() {
        reporter.warn(&format!(
            "{side} date '{date}' does not start with a 4-digit year; leaving it unbounded"
        ));
    }
    year
}
