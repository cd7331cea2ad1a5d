//! Test selection filters.
//!
//! A filter carries a structured selection expression as text (a `<filter>`
//! document). Quorra never interprets it: the controller builds one, ships it
//! as a command argument, and the worker hands it to its runner unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Text of the filter that matches everything.
pub const EMPTY_FILTER_TEXT: &str = "<filter/>";

/// Immutable test selection criterion.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestFilter {
    text: String,
}

impl TestFilter {
    /// Wrap a filter expression.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// The filter that always passes.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(EMPTY_FILTER_TEXT)
    }

    /// The filter expression text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether this filter selects everything.
    ///
    /// Blank text and a childless `<filter>` element both count as empty.
    pub fn is_empty(&self) -> bool {
        let trimmed = self.text.trim();
        trimmed.is_empty() || trimmed == EMPTY_FILTER_TEXT || trimmed == "<filter></filter>"
    }
}

impl Default for TestFilter {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for TestFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
