use chrono::NaiveDate;
use imfdata::ResultRow;
use imfdata::stats::{GroupKey, describe_data};
use std::collections::BTreeMap;

fn row(id: &str, country: &str, year: i32, v: Option<f64>) -> ResultRow {
    ResultRow {
        id: id.into(),
        country: country.into(),
        period: NaiveDate::from_ymd_opt(year, 1, 1).unwrap(),
        value: v,
        status: None,
        description: Some("Dummy".into()),
        attributes: BTreeMap::new(),
    }
}

#[test]
fn grouped_stats_handle_missing_and_median_even_odd() {
    // (IND1, AA) with [1,2,3,4] -> median 2.5
    // (IND1, BB) with [10, None, 30] -> missing 1, median 20
    let rows = vec![
        row("IND1", "AA", 2018, Some(1.0)),
        row("IND1", "AA", 2019, Some(2.0)),
        row("IND1", "AA", 2020, Some(3.0)),
        row("IND1", "AA", 2021, Some(4.0)),
        row("IND1", "BB", 2018, Some(10.0)),
        row("IND1", "BB", 2019, None),
        row("IND1", "BB", 2020, Some(30.0)),
    ];
    let got = describe_data(&rows);
    assert_eq!(got.len(), 2);

    let a = &got[0];
    assert_eq!(
        a.key,
        GroupKey {
            id: "IND1".into(),
            country: "AA".into()
        }
    );
    assert_eq!(a.count, 4);
    assert_eq!(a.missing, 0);
    assert_eq!(a.min, Some(1.0));
    assert_eq!(a.max, Some(4.0));
    assert!((a.mean.unwrap() - 2.5).abs() < 1e-12);
    assert!((a.median.unwrap() - 2.5).abs() < 1e-12);

    let b = &got[1];
    assert_eq!(b.count, 2);
    assert_eq!(b.missing, 1);
    assert_eq!(b.median, Some(20.0));
}

#[test]
fn groups_are_ordered_by_indicator_then_country() {
    let rows = vec![
        row("B", "US", 2000, Some(1.0)),
        row("A", "US", 2000, Some(1.0)),
        row("A", "DE", 2000, Some(1.0)),
    ];
    let keys: Vec<_> = describe_data(&rows)
        .into_iter()
        .map(|s| (s.key.id, s.key.country))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("A".to_string(), "DE".to_string()),
            ("A".to_string(), "US".to_string()),
            ("B".to_string(), "US".to_string()),
        ]
    );
}
