//! Footer extensions: side-channel metadata stored next to a fragment
//!
//! Each fragment of a stripe carries its own copy, so the metadata is
//! replicated N+M times and survives exactly as well as the data does.

use crate::record;
use hivestore_common::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Footer extension file magic ("FEXT")
const FOOTER_MAGIC: u32 = 0x4645_5854;

/// Key prefix for legal-hold markers
const LEGAL_HOLD_PREFIX: &str = "legal-hold/";

/// Key/value metadata attached to one fragment
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FooterExtension {
    entries: BTreeMap<String, Vec<u8>>,
}

impl FooterExtension {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Set a value, returning the previous one
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Option<Vec<u8>> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<u8>> {
        self.entries.remove(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Place a named legal hold on the fragment
    pub fn add_legal_hold(&mut self, name: &str) {
        self.entries
            .insert(format!("{LEGAL_HOLD_PREFIX}{name}"), Vec::new());
    }

    /// Release a named legal hold; returns whether it was present
    pub fn remove_legal_hold(&mut self, name: &str) -> bool {
        self.entries
            .remove(&format!("{LEGAL_HOLD_PREFIX}{name}"))
            .is_some()
    }

    /// Names of the legal holds in effect
    pub fn legal_holds(&self) -> impl Iterator<Item = &str> {
        self.entries
            .keys()
            .filter_map(|k| k.strip_prefix(LEGAL_HOLD_PREFIX))
    }

    /// Whether any legal hold is in effect
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.legal_holds().next().is_some()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        record::encode(FOOTER_MAGIC, self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        record::decode(FOOTER_MAGIC, data)
    }
}
