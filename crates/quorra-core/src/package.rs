//! Hierarchical test packages.
//!
//! A [`TestPackage`] describes what to test and with which settings. A leaf
//! package names one test program; a composite package groups sub-packages
//! and is executed as the union of its children. Under process-parallel
//! orchestration every sub-package gets its own worker process.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Process-wide package id counter.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> String {
    NEXT_ID.fetch_add(1, Ordering::Relaxed).to_string()
}

/// Hierarchical descriptor of work.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestPackage {
    /// Unique within a run.
    pub id: String,
    /// Short display name (file name for leaves).
    pub name: String,
    /// Full name (file path for leaves).
    pub full_name: String,
    /// Ordered settings, unique keys.
    #[serde(default)]
    pub settings: IndexMap<String, Value>,
    /// Ordered children; empty for a leaf.
    #[serde(default)]
    pub sub_packages: Vec<TestPackage>,
}

impl TestPackage {
    /// Create a leaf package for a single test program.
    pub fn new(file: impl Into<String>) -> Self {
        let full_name = file.into();
        let name = Path::new(&full_name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&full_name)
            .to_string();
        Self {
            id: next_id(),
            name,
            full_name,
            settings: IndexMap::new(),
            sub_packages: Vec::new(),
        }
    }

    /// Create a composite package with one leaf per file.
    pub fn from_files<I, S>(files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut package = Self {
            id: next_id(),
            name: String::new(),
            full_name: String::new(),
            settings: IndexMap::new(),
            sub_packages: Vec::new(),
        };
        for file in files {
            package.add_sub_package(Self::new(file));
        }
        package
    }

    /// Replace the generated id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Add a child. Settings already on this package are copied into the
    /// child unless the child overrides them.
    pub fn add_sub_package(&mut self, mut sub: TestPackage) {
        for (key, value) in &self.settings {
            if !sub.settings.contains_key(key) {
                let _ = sub.settings.insert(key.clone(), value.clone());
            }
        }
        self.sub_packages.push(sub);
    }

    /// Set a value, replacing any previous one while keeping its position.
    pub fn add_setting(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let _ = self.settings.insert(key.into(), value.into());
    }

    /// Whether a setting is present.
    pub fn has_setting(&self, key: &str) -> bool {
        self.settings.contains_key(key)
    }

    /// Typed lookup. Missing keys and values of the wrong shape yield `default`.
    pub fn get_setting<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.settings.get(key) {
            Some(value) => match serde_json::from_value(value.clone()) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(key, error = %e, "package setting has unexpected type, using default");
                    default
                }
            },
            None => default,
        }
    }

    /// A leaf has no sub-packages.
    pub fn is_leaf(&self) -> bool {
        self.sub_packages.is_empty()
    }

    /// Label used in logs and failure reports.
    pub fn display_name(&self) -> &str {
        if !self.full_name.is_empty() {
            &self.full_name
        } else if !self.name.is_empty() {
            &self.name
        } else {
            &self.id
        }
    }
}
