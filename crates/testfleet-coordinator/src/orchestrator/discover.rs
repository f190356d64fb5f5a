//! Test-case discovery
//!
//! Test cases are the `.feature` files under the project folder on the
//! template instance's disk. Their file names are what travels through the
//! task queue; workers resolve them back to paths inside the image.

use std::path::Path;

use anyhow::{Context, Result};
use walkdir::WalkDir;

use testfleet_common::defaults::TEST_CASE_EXTENSION;

/// Collect the test-case file names under a project folder, sorted.
pub fn discover_test_cases(project_folder: &Path) -> Result<Vec<String>> {
    let mut cases = Vec::new();

    for entry in WalkDir::new(project_folder) {
        let entry = entry.with_context(|| {
            format!("Failed to walk project folder {}", project_folder.display())
        })?;

        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|e| e.to_str()) != Some(TEST_CASE_EXTENSION) {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            cases.push(name.to_string());
        }
    }

    cases.sort();
    Ok(cases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn finds_feature_files_recursively() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("auth")).unwrap();
        fs::write(dir.path().join("checkout.feature"), "").unwrap();
        fs::write(dir.path().join("auth/login.feature"), "").unwrap();
        fs::write(dir.path().join("auth/notes.txt"), "").unwrap();

        let cases = discover_test_cases(dir.path()).unwrap();
        assert_eq!(cases, vec!["checkout.feature", "login.feature"]);
    }

    #[test]
    fn empty_folder_yields_empty_list() {
        let dir = TempDir::new().unwrap();
        assert!(discover_test_cases(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn missing_folder_is_an_error() {
        let dir = TempDir::new().unwrap();
        let gone = dir.path().join("nope");
        assert!(discover_test_cases(&gone).is_err());
    }
}
