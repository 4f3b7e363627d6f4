//! Test programs of a grading-tests checkout
//!
//! Layout: `tests/<problem>/languages/<language>/<VERDICT>[-suffix].<ext>`,
//! with an `image.yml` in each language directory naming the image the
//! programs run on.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::verdict::{verdict_from_filename, Verdict, VerdictCode};

const IMAGE_MANIFEST: &str = "image.yml";

/// One program to submit, with the verdict its filename promises
#[derive(Debug, Clone, PartialEq)]
pub struct TestProgram {
    pub problem: String,
    pub language: String,
    /// 1-based position within its language directory
    pub index: usize,
    pub code_path: PathBuf,
    pub image_id: String,
    pub expected_verdict: Verdict,
}

impl TestProgram {
    /// Human readable label, e.g. `00-hello - cpp - 1 (AC)`
    pub fn label(&self) -> String {
        format!(
            "{} - {} - {} ({})",
            self.problem, self.language, self.index, self.expected_verdict
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageManifest {
    image_name: String,
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('_') || name.starts_with('.')
}

fn is_disabled_language(name: &str) -> bool {
    is_hidden(name) || name == "__disabled__" || name.ends_with('~')
}

fn is_program(name: &str) -> bool {
    !is_hidden(name)
        && !name.ends_with(".test.ts")
        && !name.ends_with(".yml")
        && name
            .get(..2)
            .and_then(VerdictCode::parse)
            .is_some()
}

/// Sorted entries of `dir` with their file names
fn sorted_entries(dir: &Path) -> anyhow::Result<Vec<(String, PathBuf)>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        entries.push((name, entry.path()));
    }
    entries.sort();
    Ok(entries)
}

fn read_image_id(language_dir: &Path) -> anyhow::Result<String> {
    let path = language_dir.join(IMAGE_MANIFEST);
    let content =
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let manifest: ImageManifest = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(manifest.image_name)
}

/// Programs of one language directory
fn language_programs(
    problem: &str,
    language: &str,
    language_dir: &Path,
) -> anyhow::Result<Vec<TestProgram>> {
    let image_id = read_image_id(language_dir)?;
    let mut programs = Vec::new();

    for (name, path) in sorted_entries(language_dir)? {
        if !path.is_file() || !is_program(&name) {
            continue;
        }
        let expected_verdict = verdict_from_filename(&name)
            .with_context(|| format!("Unexpected program name {}", path.display()))?;
        programs.push(TestProgram {
            problem: problem.to_string(),
            language: language.to_string(),
            index: programs.len() + 1,
            code_path: path,
            image_id: image_id.clone(),
            expected_verdict,
        });
    }
    Ok(programs)
}

/// Enumerate every test program under `<tests_dir>/tests`, in a stable order
pub fn enumerate_tests(tests_dir: &Path) -> anyhow::Result<Vec<TestProgram>> {
    let root = tests_dir.join("tests");
    if !root.is_dir() {
        bail!("No tests directory at {}", root.display());
    }

    let mut programs = Vec::new();
    for (problem, problem_dir) in sorted_entries(&root)? {
        if !problem_dir.is_dir() || is_hidden(&problem) {
            continue;
        }
        let languages_dir = problem_dir.join("languages");
        if !languages_dir.is_dir() {
            warn!("Problem {} has no languages directory, skipping", problem);
            continue;
        }
        for (language, language_dir) in sorted_entries(&languages_dir)? {
            if !language_dir.is_dir() || is_disabled_language(&language) {
                continue;
            }
            let found = language_programs(&problem, &language, &language_dir)?;
            debug!("{}/{}: {} program(s)", problem, language, found.len());
            programs.extend(found);
        }
    }
    Ok(programs)
}
