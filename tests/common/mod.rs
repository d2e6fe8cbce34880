//! Canned IMF responses served through an in-memory transport.
#![allow(dead_code)]

use anyhow::Result;
use imfdata::request::{HttpReply, Transport};
use imfdata::Settings;
use serde_json::{Value, json};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

pub const BASE: &str = "http://fixture.test/svc/";

/// Serves documents by endpoint path; unknown paths answer 404.
#[derive(Clone, Default)]
pub struct Fixtures {
    routes: HashMap<String, String>,
    calls: Rc<RefCell<Vec<String>>>,
}

impl Fixtures {
    pub fn with(mut self, path: &str, doc: Value) -> Self {
        self.routes.insert(format!("{BASE}{path}"), doc.to_string());
        self
    }

    pub fn without(mut self, path: &str) -> Self {
        self.routes.remove(&format!("{BASE}{path}"));
        self
    }

    /// Paths requested so far, in order, relative to [`BASE`].
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .map(|u| u.trim_start_matches(BASE).to_string())
            .collect()
    }

    pub fn boxed(&self) -> Box<dyn Transport> {
        Box::new(self.clone())
    }
}

impl Transport for Fixtures {
    fn get(&self, url: &str) -> Result<HttpReply> {
        self.calls.borrow_mut().push(url.to_string());
        Ok(match self.routes.get(url) {
            Some(body) => HttpReply::ok(body.clone()),
            None => HttpReply {
                status: 404,
                body: String::new(),
            },
        })
    }
}

pub fn settings(cache_dir: &Path) -> Settings {
    Settings {
        base_url: BASE.into(),
        max_attempts: 1,
        retry_delay: Duration::ZERO,
        cache_dir: cache_dir.to_path_buf(),
        ..Settings::default()
    }
}

pub const US_KEY: &str = "CompactData/IFS/Q.US.NGDP_R_SA_XDC+NGDP_R_XDC";
pub const DE_KEY: &str = "CompactData/IFS/Q.DE.NGDP_R_SA_XDC+NGDP_R_XDC";

/// A small but complete IFS: catalog, structure, codelists, frequency
/// metadata and quarterly real GDP for the US and Germany.
pub fn ifs() -> Fixtures {
    Fixtures::default()
        .with("Dataflow", dataflow())
        .with("DataStructure/IFS", structure())
        .with("GenericMetadata/IFS", generic_metadata())
        .with(
            "CodeList/CL_AREA_IFS",
            codelist(&[("US", "United States"), ("DE", "Germany"), ("AF", "Afghanistan")]),
        )
        .with(
            "CodeList/CL_INDICATOR_IFS",
            codelist(&[
                (
                    "NGDP_R_SA_XDC",
                    "Gross Domestic Product, Real, Seasonally Adjusted, Domestic Currency",
                ),
                ("NGDP_R_XDC", "Gross Domestic Product, Real, Domestic Currency"),
                ("PCPI_IX", "Prices, Consumer Price Index, All items, Index"),
                ("ENDA_XDC_USD_RATE", "Exchange Rates, Domestic Currency per U.S. Dollar"),
            ]),
        )
        .with(US_KEY, us_data())
        .with(DE_KEY, de_data())
}

pub fn dataflow() -> Value {
    json!({"Structure": {"Dataflows": {"Dataflow": [
        {
            "@id": "DS-IFS",
            "Name": {"@xml:lang": "en", "#text": "International Financial Statistics (IFS)"},
            "KeyFamilyRef": {"KeyFamilyID": "IFS", "KeyFamilyAgencyID": "IMF"}
        },
        {
            "@id": "DS-DOT",
            "Name": {"@xml:lang": "en", "#text": "Direction of Trade Statistics (DOTS)"},
            "KeyFamilyRef": {"KeyFamilyID": "DOT", "KeyFamilyAgencyID": "IMF"}
        }
    ]}}})
}

pub fn structure() -> Value {
    json!({"Structure": {"KeyFamilies": {"KeyFamily": {
        "@id": "IFS",
        "Components": {"Dimension": [
            {"@codelist": "CL_FREQ", "@conceptRef": "FREQ", "@isFrequencyDimension": "true"},
            {"@codelist": "CL_AREA_IFS", "@conceptRef": "REF_AREA"},
            {"@codelist": "CL_INDICATOR_IFS", "@conceptRef": "INDICATOR"}
        ]}
    }}}})
}

pub fn generic_metadata() -> Value {
    json!({"GenericMetadata": {"MetadataSet": {"AttributeValueSet": [
        {"TargetValues": {"ComponentValue": [
            {"@component": "FREQ", "@object": "Dimension", "#text": "Q"},
            {"@component": "REF_AREA", "@object": "Dimension", "#text": "US"}
        ]}},
        {"TargetValues": {"ComponentValue": [
            {"@component": "FREQ", "@object": "Dimension", "#text": "A"}
        ]}}
    ]}}})
}

pub fn codelist(codes: &[(&str, &str)]) -> Value {
    let codes: Vec<Value> = codes
        .iter()
        .map(|(v, d)| json!({"@value": v, "Description": {"@xml:lang": "en", "#text": d}}))
        .collect();
    json!({"Structure": {"CodeLists": {"CodeList": {"Code": codes}}}})
}

pub fn us_data() -> Value {
    json!({"CompactData": {"DataSet": {"Series": [
        {
            "@FREQ": "Q", "@REF_AREA": "US", "@INDICATOR": "NGDP_R_XDC", "@UNIT_MULT": "6",
            "Obs": [
                {"@TIME_PERIOD": "2000-Q2", "@OBS_VALUE": "101"},
                {"@TIME_PERIOD": "2000-Q1", "@OBS_VALUE": "100"}
            ]
        },
        {
            "@FREQ": "Q", "@REF_AREA": "US", "@INDICATOR": "NGDP_R_SA_XDC", "@UNIT_MULT": "6",
            "Obs": {"@TIME_PERIOD": "2000-Q1", "@OBS_VALUE": "99.5"}
        }
    ]}}})
}

/// Germany reports the same quarter twice; the revision comes last.
pub fn de_data() -> Value {
    json!({"CompactData": {"DataSet": {"Series": {
        "@FREQ": "Q", "@REF_AREA": "DE", "@INDICATOR": "NGDP_R_XDC",
        "Obs": [
            {"@TIME_PERIOD": "2000-Q1", "@OBS_VALUE": "50"},
            {"@TIME_PERIOD": "2000-Q1", "@OBS_VALUE": "51", "@OBS_STATUS": "R"}
        ]
    }}}})
}
