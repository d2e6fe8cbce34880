//! Serde models for the IMF SDMX-JSON documents.
//!
//! The service serializes XML into JSON mechanically, so a few quirks show up
//! everywhere:
//! - attributes are keys prefixed with `@`, element text lives under `#text`;
//! - an element that occurs once is an object, several occurrences are an array;
//! - localized text is either a plain string, `{"@xml:lang": .., "#text": ..}`,
//!   or an array of those.
//!
//! Everything here accepts all of these shapes.

use crate::models::{
    CodeEntry, Codelist, DatasetDescriptor, DimensionDescriptor, normalize_column_name,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::fmt;

/// An element that may occur once (object) or several times (array).
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(v) => v,
            OneOrMany::One(x) => vec![x],
        }
    }
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

/// Localized text. Keeps the first (usually English) variant and its
/// `@xml:lang` tag when the service sent one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Text {
    pub text: String,
    pub lang: Option<String>,
}

impl<'de> Deserialize<'de> for Text {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::{self, IgnoredAny, MapAccess, SeqAccess, Visitor};
        struct TextVisitor;

        impl<'de> Visitor<'de> for TextVisitor {
            type Value = Text;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a string, an object with '#text', or an array of those")
            }

            fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Text {
                    text: s.to_string(),
                    lang: None,
                })
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Text::default())
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut out = Text::default();
                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "#text" => out.text = map.next_value()?,
                        "@xml:lang" => out.lang = Some(map.next_value()?),
                        _ => {
                            map.next_value::<IgnoredAny>()?;
                        }
                    }
                }
                Ok(out)
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let first: Option<Text> = seq.next_element()?;
                while seq.next_element::<IgnoredAny>()?.is_some() {}
                Ok(first.unwrap_or_default())
            }
        }

        deserializer.deserialize_any(TextVisitor)
    }
}

// ---------------------------------------------------------------- Dataflow

#[derive(Debug, Clone, Deserialize)]
struct DataflowDoc {
    #[serde(rename = "Structure")]
    structure: DataflowStructure,
}

#[derive(Debug, Clone, Deserialize)]
struct DataflowStructure {
    #[serde(rename = "Dataflows")]
    dataflows: Dataflows,
}

#[derive(Debug, Clone, Deserialize)]
struct Dataflows {
    #[serde(rename = "Dataflow", default)]
    dataflow: OneOrMany<RawDataflow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDataflow {
    #[serde(rename = "@id", default)]
    pub id: String,
    #[serde(rename = "Name", default)]
    pub name: Text,
    #[serde(rename = "KeyFamilyRef")]
    pub key_family: KeyFamilyRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyFamilyRef {
    #[serde(rename = "KeyFamilyID")]
    pub id: String,
}

/// Parse the `Dataflow` catalog into dataset descriptors (unsorted).
pub fn parse_dataflows(doc: &Value) -> Result<Vec<DatasetDescriptor>> {
    let doc: DataflowDoc = serde_json::from_value(doc.clone()).context("parse dataflow catalog")?;
    Ok(doc
        .structure
        .dataflows
        .dataflow
        .into_vec()
        .into_iter()
        .map(|f| DatasetDescriptor {
            code: f.key_family.id,
            name: f.name.text,
            flow_id: f.id,
        })
        .collect())
}

// ----------------------------------------------------------- DataStructure

#[derive(Debug, Clone, Deserialize)]
struct StructureDoc {
    #[serde(rename = "Structure")]
    structure: KeyFamiliesHolder,
}

#[derive(Debug, Clone, Deserialize)]
struct KeyFamiliesHolder {
    #[serde(rename = "KeyFamilies")]
    key_families: KeyFamilies,
}

#[derive(Debug, Clone, Deserialize)]
struct KeyFamilies {
    #[serde(rename = "KeyFamily")]
    key_family: OneOrMany<KeyFamily>,
}

#[derive(Debug, Clone, Deserialize)]
struct KeyFamily {
    #[serde(rename = "Components")]
    components: Components,
}

#[derive(Debug, Clone, Deserialize)]
struct Components {
    #[serde(rename = "Dimension", default)]
    dimension: OneOrMany<RawDimension>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDimension {
    #[serde(rename = "@codelist")]
    pub codelist: String,
    #[serde(rename = "@conceptRef", default)]
    pub concept: Option<String>,
    #[serde(rename = "@isFrequencyDimension", default)]
    pub is_frequency: Option<String>,
}

/// Dimensions of the first key family, numbered from 1 in declared order.
///
/// Also returns whether each dimension declares itself the frequency dimension.
pub fn parse_dimensions(doc: &Value) -> Result<Vec<(DimensionDescriptor, bool)>> {
    let doc: StructureDoc = serde_json::from_value(doc.clone()).context("parse data structure")?;
    let family = doc
        .structure
        .key_families
        .key_family
        .into_vec()
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("data structure lists no key family"))?;
    Ok(family
        .components
        .dimension
        .into_vec()
        .into_iter()
        .enumerate()
        .map(|(n, d)| {
            let freq = d
                .is_frequency
                .as_deref()
                .is_some_and(|f| f.eq_ignore_ascii_case("true"));
            (
                DimensionDescriptor {
                    position: n + 1,
                    codelist: d.codelist,
                    concept: d.concept,
                },
                freq,
            )
        })
        .collect())
}

// ---------------------------------------------------------------- CodeList

#[derive(Debug, Clone, Deserialize)]
struct CodeListDoc {
    #[serde(rename = "Structure")]
    structure: CodeListsHolder,
}

#[derive(Debug, Clone, Deserialize)]
struct CodeListsHolder {
    #[serde(rename = "CodeLists")]
    code_lists: CodeLists,
}

#[derive(Debug, Clone, Deserialize)]
struct CodeLists {
    #[serde(rename = "CodeList")]
    code_list: OneOrMany<RawCodeList>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawCodeList {
    #[serde(rename = "Code", default)]
    code: OneOrMany<RawCode>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawCode {
    #[serde(rename = "@value")]
    value: String,
    #[serde(rename = "Description", default)]
    description: Text,
    #[serde(flatten)]
    attributes: Map<String, Value>,
}

impl RawCode {
    // Every text column besides the code and its description, keyed the way
    // result columns are named (`Description.@xml:lang` -> `DESCRIPTION_XML_LANG`).
    fn into_entry(self) -> CodeEntry {
        let mut entry = CodeEntry::new(self.value, self.description.text);
        if let Some(lang) = self.description.lang {
            entry
                .attributes
                .insert(normalize_column_name("Description.@xml:lang"), lang);
        }
        for (k, v) in &self.attributes {
            if let Some(v) = scalar_text(v) {
                entry.attributes.insert(normalize_column_name(k), v);
            }
        }
        entry
    }
}

/// Parse a `CodeList/{id}` document.
pub fn parse_codelist(id: &str, doc: &Value) -> Result<Codelist> {
    let doc: CodeListDoc =
        serde_json::from_value(doc.clone()).with_context(|| format!("parse codelist {id}"))?;
    let entries = doc
        .structure
        .code_lists
        .code_list
        .into_vec()
        .into_iter()
        .flat_map(|cl| cl.code.into_vec())
        .map(RawCode::into_entry);
    Ok(Codelist::new(id, entries))
}

// --------------------------------------------------------- GenericMetadata

/// Frequency codes referenced by a `GenericMetadata/{dataset}` document.
///
/// The frequency shows up as `{"@component": "FREQ", "#text": "Q"}` inside the
/// target values of each metadata set; codes keep first-seen order.
pub fn parse_frequency_codes(doc: &Value) -> Vec<String> {
    fn walk(v: &Value, out: &mut Vec<String>) {
        match v {
            Value::Object(m) => {
                let is_freq = m
                    .get("@component")
                    .and_then(Value::as_str)
                    .is_some_and(|c| c.to_ascii_uppercase().contains("FREQ"));
                if is_freq {
                    if let Some(code) = m.get("#text").and_then(Value::as_str) {
                        let code = code.trim();
                        if !code.is_empty() && !out.iter().any(|c| c == code) {
                            out.push(code.to_string());
                        }
                    }
                }
                m.values().for_each(|x| walk(x, out));
            }
            Value::Array(a) => a.iter().for_each(|x| walk(x, out)),
            _ => {}
        }
    }
    let mut out = Vec::new();
    walk(doc, &mut out);
    out
}

// ------------------------------------------------------------- CompactData

#[derive(Debug, Clone, Deserialize)]
struct CompactDataDoc {
    #[serde(rename = "CompactData")]
    compact: CompactData,
}

#[derive(Debug, Clone, Deserialize)]
struct CompactData {
    #[serde(rename = "DataSet")]
    dataset: DataSet,
}

#[derive(Debug, Clone, Deserialize)]
struct DataSet {
    #[serde(rename = "Series", default)]
    series: Option<OneOrMany<RawSeries>>,
}

/// One series: its own attributes plus zero or more observations.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RawSeries {
    #[serde(rename = "Obs", default)]
    pub obs: Option<OneOrMany<Map<String, Value>>>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

/// Series of a `CompactData` response, whether the service sent one object or
/// an array. A data set without a `Series` element yields no series.
pub fn parse_compact_data(doc: &Value) -> Result<Vec<RawSeries>> {
    let doc: CompactDataDoc = serde_json::from_value(doc.clone()).context("parse compact data")?;
    Ok(doc
        .compact
        .dataset
        .series
        .map(OneOrMany::into_vec)
        .unwrap_or_default())
}

/// Scalar attribute value as text; nested structures are not attributes.
pub fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
