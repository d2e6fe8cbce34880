use crate::models::{MetadataTable, ResultRow, columns};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Grouping key used in data summaries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub id: String,
    pub country: String,
}

/// Summary statistics for a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Summary {
    pub key: GroupKey,
    pub count: usize,
    pub missing: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub median: Option<f64>,
}

/// Compute grouped statistics by (ID, COUNTRY).
pub fn describe_data(rows: &[ResultRow]) -> Vec<Summary> {
    let mut groups: BTreeMap<GroupKey, Vec<f64>> = BTreeMap::new();
    let mut missing: BTreeMap<GroupKey, usize> = BTreeMap::new();
    for r in rows {
        let key = GroupKey {
            id: r.id.clone(),
            country: r.country.clone(),
        };
        match r.value {
            Some(v) if v.is_finite() => groups.entry(key).or_default().push(v),
            _ => {
                groups.entry(key.clone()).or_default();
                *missing.entry(key).or_default() += 1;
            }
        }
    }

    let mut out = Vec::new();
    for (key, mut vals) in groups {
        vals.sort_by(f64::total_cmp);
        let count = vals.len();
        let min = vals.first().cloned();
        let max = vals.last().cloned();
        let mean = if count > 0 {
            Some(vals.iter().copied().sum::<f64>() / count as f64)
        } else {
            None
        };
        let median = if count == 0 {
            None
        } else if count % 2 == 1 {
            Some(vals[count / 2])
        } else {
            Some((vals[count / 2 - 1] + vals[count / 2]) / 2.0)
        };
        let miss = missing.get(&key).cloned().unwrap_or(0);
        out.push(Summary {
            key,
            count,
            missing: miss,
            min,
            max,
            mean,
            median,
        });
    }
    out
}

/// Per-column profile of a metadata table: non-empty count, distinct values,
/// the most frequent value and how often it occurs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnSummary {
    pub column: String,
    pub count: usize,
    pub unique: usize,
    pub top: Option<String>,
    pub freq: usize,
}

pub fn describe_meta(meta: &MetadataTable) -> Vec<ColumnSummary> {
    let ids = meta.entries.iter().map(|e| e.value.as_str());
    let descriptions = meta.entries.iter().map(|e| e.description.as_str());
    let mut out = vec![
        profile(columns::ID, ids),
        profile(columns::DESCRIPTION, descriptions),
    ];
    for column in meta.columns().into_iter().skip(2) {
        let values = meta
            .entries
            .iter()
            .map(|e| e.attributes.get(&column).map_or("", String::as_str));
        out.push(profile(&column, values));
    }
    out
}

fn profile<'a>(column: &str, values: impl Iterator<Item = &'a str>) -> ColumnSummary {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for v in values.filter(|v| !v.is_empty()) {
        *counts.entry(v).or_default() += 1;
    }
    // Ties resolve to the lexicographically smallest value.
    let top = counts
        .iter()
        .fold(None::<(&str, usize)>, |best, (v, n)| match best {
            Some((_, bn)) if bn >= *n => best,
            _ => Some((*v, *n)),
        });
    ColumnSummary {
        column: column.to_string(),
        count: counts.values().sum(),
        unique: counts.len(),
        top: top.map(|(v, _)| v.to_string()),
        freq: top.map(|(_, n)| n).unwrap_or(0),
    }
}
