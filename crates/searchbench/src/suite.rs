//! Test suite loading
//!
//! A suite is a TOML or JSON file listing test cases:
//!
//! ```toml
//! name = "web-basics"
//!
//! [[tests]]
//! name = "rust-async"
//! type = "search"
//! query = "tokio select macro"
//! expected_topics = ["tokio", "futures"]
//!
//! [[tests]]
//! name = "docs-page"
//! type = "extract"
//! url = "https://doc.rust-lang.org/book/ch16-00-concurrency.html"
//! expected_content = ["threads", "message passing"]
//! ```

use crate::types::{OperationType, TestSpec};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// A named collection of test cases
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestSuite {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub tests: Vec<TestSpec>,
}

impl TestSuite {
    pub fn new(tests: Vec<TestSpec>) -> Self {
        Self { name: None, tests }
    }

    /// Load and validate a suite from a `.toml` or `.json` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        let suite: TestSuite = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&contents)?,
            Some("json") => serde_json::from_str(&contents)?,
            other => {
                return Err(Error::Config(format!(
                    "unsupported test suite format {:?} for {}",
                    other,
                    path.display()
                )));
            }
        };

        suite.validate()?;
        Ok(suite)
    }

    /// Load every `.toml` / `.json` suite in `dir` (non-recursive), merged in file name order
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| matches!(path.extension().and_then(|e| e.to_str()), Some("toml" | "json")))
            .collect();
        paths.sort();

        let mut merged = TestSuite {
            name: dir.file_name().and_then(|n| n.to_str()).map(str::to_string),
            tests: Vec::new(),
        };
        for path in paths {
            let suite = Self::from_file(&path)?;
            tracing::debug!(path = %path.display(), tests = suite.tests.len(), "loaded test suite");
            merged.tests.extend(suite.tests);
        }

        merged.validate()?;
        Ok(merged)
    }

    /// Validate every test and reject duplicate names
    pub fn validate(&self) -> Result<()> {
        validate_tests(&self.tests)
    }

    /// Tests of the given operation types
    pub fn filter_by_type(&self, operations: &[OperationType]) -> Vec<TestSpec> {
        self.tests
            .iter()
            .filter(|t| operations.contains(&t.operation))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

/// Validate each test and reject duplicate names across `tests`
pub(crate) fn validate_tests(tests: &[TestSpec]) -> Result<()> {
    let mut seen = HashSet::new();
    for test in tests {
        test.validate()?;
        if !seen.insert(test.name.as_str()) {
            return Err(Error::InvalidTest {
                name: test.name.clone(),
                reason: "duplicate test name".to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SUITE_TOML: &str = r#"
name = "basics"

[[tests]]
name = "rust-async"
type = "search"
query = "tokio select macro"
expected_topics = ["tokio"]

[[tests]]
name = "site-crawl"
type = "crawl"
url = "https://example.com"
max_pages = 5
max_depth = 2
"#;

    #[test]
    fn test_load_toml_suite() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("suite.toml");
        std::fs::write(&path, SUITE_TOML).unwrap();

        let suite = TestSuite::from_file(&path).unwrap();
        assert_eq!(suite.name.as_deref(), Some("basics"));
        assert_eq!(suite.len(), 2);
        assert_eq!(suite.tests[1].operation, OperationType::Crawl);
        assert_eq!(suite.tests[1].max_pages, Some(5));
        assert_eq!(suite.filter_by_type(&[OperationType::Search]).len(), 1);
    }

    #[test]
    fn test_load_json_suite() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("suite.json");
        let suite = TestSuite::new(vec![TestSpec::extract("page", "https://example.com/a")]);
        std::fs::write(&path, serde_json::to_string(&suite).unwrap()).unwrap();

        let loaded = TestSuite::from_file(&path).unwrap();
        assert_eq!(loaded.tests[0].url.as_deref(), Some("https://example.com/a"));
    }

    #[test]
    fn test_invalid_tests_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.toml");
        std::fs::write(
            &path,
            r#"
[[tests]]
name = "no-query"
type = "search"
"#,
        )
        .unwrap();

        let err = TestSuite::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("no-query"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let suite = TestSuite::new(vec![TestSpec::search("a", "x"), TestSpec::search("a", "y")]);
        assert!(suite.validate().is_err());
    }

    #[test]
    fn test_from_dir_merges_in_name_order() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("b.toml"), SUITE_TOML).unwrap();
        std::fs::write(
            temp_dir.path().join("a.json"),
            serde_json::to_string(&TestSuite::new(vec![TestSpec::search("first", "q")])).unwrap(),
        )
        .unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), "ignored").unwrap();

        let suite = TestSuite::from_dir(temp_dir.path()).unwrap();
        assert_eq!(suite.len(), 3);
        assert_eq!(suite.tests[0].name, "first");
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("suite.yaml");
        std::fs::write(&path, "tests: []").unwrap();
        assert!(TestSuite::from_file(&path).is_err());
    }
}
