//! Scene and test case loading
//!
//! Both files are JSON arrays. Loading fails with a `DataLoad` error that
//! names the file and the reason (missing, empty, malformed JSON, or a record
//! that does not match the expected shape).

use crate::types::{CasesByScene, Scene, TestCase};
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Maximum number of offending references listed in an error
const MAX_REPORTED_REFS: usize = 10;

fn load_json_array<T: DeserializeOwned>(path: &Path, kind: &str) -> Result<Vec<T>> {
    if !path.exists() {
        return Err(Error::data_load(kind, path, "file not found"));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::data_load(kind, path, format!("failed to read file: {}", e)))?;

    if content.trim().is_empty() {
        return Err(Error::data_load(
            kind,
            path,
            "file is empty, expected a JSON array",
        ));
    }

    let json: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| Error::data_load(kind, path, format!("invalid JSON: {}", e)))?;

    serde_json::from_value(json)
        .map_err(|e| Error::data_load(kind, path, format!("validation failed: {}", e)))
}

/// Load the scenes file
pub fn load_scenes(path: &Path) -> Result<Vec<Scene>> {
    let scenes: Vec<Scene> = load_json_array(path, "scenes")?;

    let mut seen = HashSet::new();
    for scene in &scenes {
        if scene.routes.is_empty() {
            return Err(Error::data_load(
                "scenes",
                path,
                format!("scene {} has no routes", scene.scene_id),
            ));
        }
        if !seen.insert(scene.scene_id.as_str()) {
            return Err(Error::data_load(
                "scenes",
                path,
                format!("duplicate scene_id {}", scene.scene_id),
            ));
        }
    }

    debug!(count = scenes.len(), path = %path.display(), "Loaded scenes");
    Ok(scenes)
}

/// Load the test cases file
pub fn load_test_cases(path: &Path) -> Result<Vec<TestCase>> {
    let cases: Vec<TestCase> = load_json_array(path, "test cases")?;

    let mut seen = HashSet::new();
    for case in &cases {
        if !seen.insert(case.case_id.as_str()) {
            return Err(Error::data_load(
                "test cases",
                path,
                format!("duplicate case_id {}", case.case_id),
            ));
        }
    }

    debug!(count = cases.len(), path = %path.display(), "Loaded test cases");
    Ok(cases)
}

/// Fail when any case points at a scene that does not exist
pub fn validate_case_scene_refs(cases: &[TestCase], scenes: &[Scene]) -> Result<()> {
    let scene_ids: HashSet<&str> = scenes.iter().map(|s| s.scene_id.as_str()).collect();

    let missing: Vec<String> = cases
        .iter()
        .filter(|c| !scene_ids.contains(c.ui_scene_id.as_str()))
        .map(|c| {
            format!(
                "case {} references unknown scene \"{}\"",
                c.case_id, c.ui_scene_id
            )
        })
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    let total = missing.len();
    Err(Error::UnknownSceneRefs {
        errors: missing.into_iter().take(MAX_REPORTED_REFS).collect(),
        total,
    })
}

pub fn group_cases_by_scene(cases: &[TestCase]) -> CasesByScene<'_> {
    let mut grouped = CasesByScene::new();
    for case in cases {
        grouped.entry(case.ui_scene_id.as_str()).or_default().push(case);
    }
    grouped
}

pub fn find_scene<'a>(scenes: &'a [Scene], scene_id: &str) -> Option<&'a Scene> {
    scenes.iter().find(|s| s.scene_id == scene_id)
}

/// Keep only the cases whose id is listed
pub fn filter_cases_by_ids(cases: Vec<TestCase>, ids: &[String]) -> Vec<TestCase> {
    let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
    cases
        .into_iter()
        .filter(|c| wanted.contains(c.case_id.as_str()))
        .collect()
}

/// Join a base URL and a route path
pub fn combine_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}
