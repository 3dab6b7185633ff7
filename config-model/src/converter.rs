//! Conversion between flat [`Entries`] and the nested YAML document that is
//! written to storage.
//!
//! `a/b/c: x` in flat form corresponds to `{a: {b: {c: x}}}` on disk.

use serde::Serialize;
use serde_yaml::Value as YamlValue;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::{Entries, Key, SEPARATOR};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConverterError {
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),
}

/// Parses a nested document into flat entries.
pub fn read(bytes: &[u8]) -> Result<Entries, ConverterError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Entries::new());
    }

    let document: YamlValue =
        serde_yaml::from_slice(bytes).map_err(|e| ConverterError::Decode(e.to_string()))?;

    let mut entries = Entries::new();
    match document {
        YamlValue::Null => {}
        YamlValue::Mapping(_) => flatten(&document, None, &mut entries)?,
        other => {
            return Err(ConverterError::Decode(format!(
                "top level must be a mapping, found {}",
                kind_of(&other)
            )))
        }
    }

    if let Some(key) = first_leaf_with_children(&entries) {
        return Err(ConverterError::Decode(format!(
            "key {key} is both a value and a parent of other keys"
        )));
    }

    Ok(entries)
}

/// Serializes flat entries as a nested document.
pub fn write(entries: &Entries) -> Result<Vec<u8>, ConverterError> {
    let mut root: BTreeMap<String, Node> = BTreeMap::new();

    for (key, value) in entries {
        insert(&mut root, key, value)?;
    }

    serde_yaml::to_string(&root)
        .map(String::into_bytes)
        .map_err(|e| ConverterError::Encode(e.to_string()))
}

#[derive(Serialize)]
#[serde(untagged)]
enum Node {
    Leaf(String),
    Branch(BTreeMap<String, Node>),
}

fn insert(root: &mut BTreeMap<String, Node>, key: &str, value: &str) -> Result<(), ConverterError> {
    let segments: Vec<&str> = key.split(SEPARATOR).collect();
    let Some((last, parents)) = segments.split_last() else {
        return Ok(());
    };

    let mut level = root;
    for segment in parents {
        let node = level
            .entry((*segment).to_string())
            .or_insert_with(|| Node::Branch(BTreeMap::new()));
        level = match node {
            Node::Branch(children) => children,
            Node::Leaf(_) => {
                return Err(ConverterError::Encode(format!(
                    "key {key} is nested below an existing value"
                )))
            }
        };
    }

    if level.contains_key(*last) {
        return Err(ConverterError::Encode(format!(
            "key {key} is both a value and a parent of other keys"
        )));
    }
    level.insert((*last).to_string(), Node::Leaf(value.to_string()));
    Ok(())
}

fn flatten(value: &YamlValue, path: Option<&str>, entries: &mut Entries) -> Result<(), ConverterError> {
    match value {
        YamlValue::Mapping(mapping) => {
            for (segment, child) in mapping {
                let YamlValue::String(segment) = segment else {
                    return Err(ConverterError::Decode(format!(
                        "mapping key under {} must be a string, found {}",
                        path.unwrap_or("<root>"),
                        kind_of(segment)
                    )));
                };
                let child_path = match path {
                    Some(parent) => format!("{parent}{SEPARATOR}{segment}"),
                    None => segment.clone(),
                };
                flatten(child, Some(&child_path), entries)?;
            }
            Ok(())
        }
        YamlValue::String(leaf) => {
            let key = path.unwrap_or_default().to_string();
            if entries.insert(key.clone(), leaf.clone()).is_some() {
                return Err(ConverterError::Decode(format!("duplicate key {key}")));
            }
            Ok(())
        }
        other => Err(ConverterError::Decode(format!(
            "value at {} must be a string, found {}",
            path.unwrap_or("<root>"),
            kind_of(other)
        ))),
    }
}

fn first_leaf_with_children(entries: &Entries) -> Option<&Key> {
    entries.keys().find(|key| {
        let child_prefix = format!("{key}{SEPARATOR}");
        entries
            .range(child_prefix.clone()..)
            .next()
            .is_some_and(|(next, _)| next.starts_with(&child_prefix))
    })
}

fn kind_of(value: &YamlValue) -> &'static str {
    match value {
        YamlValue::Null => "null",
        YamlValue::Bool(_) => "bool",
        YamlValue::Number(_) => "number",
        YamlValue::String(_) => "string",
        YamlValue::Sequence(_) => "sequence",
        YamlValue::Mapping(_) => "mapping",
        YamlValue::Tagged(_) => "tagged value",
    }
}
