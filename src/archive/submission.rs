//! Submission artifact: `driver.tgz`, `problem.tgz` and `submission.tgz`
//! bundled into one uncompressed tar, always in that order.

use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::info;

use super::{read_tar_gz_files, read_tar_members, tar_gz_dir, tar_gz_files, ArchiveBuilder};
use crate::error::{QueueError, Result};

/// Member names of the container, in their fixed order
pub const MEMBER_NAMES: [&str; 3] = ["driver.tgz", "problem.tgz", "submission.tgz"];

/// Manifest file naming the compiler of the submitted program
pub const SUBMISSION_MANIFEST: &str = "submission.yml";

/// The three gzip-tar layers of one gradable unit
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionArtifact {
    pub driver: Vec<u8>,
    pub problem: Vec<u8>,
    pub submission: Vec<u8>,
}

impl SubmissionArtifact {
    /// Package the three source trees independently
    pub fn from_dirs(driver_dir: &Path, problem_dir: &Path, submission_dir: &Path) -> Result<Self> {
        Ok(Self {
            driver: tar_gz_dir(driver_dir)?,
            problem: tar_gz_dir(problem_dir)?,
            submission: tar_gz_dir(submission_dir)?,
        })
    }

    /// Serialize as the uncompressed container the queue accepts
    pub fn to_tar(&self) -> Result<Vec<u8>> {
        let [driver, problem, submission] = MEMBER_NAMES;
        ArchiveBuilder::new()
            .member(driver, self.driver.clone())
            .member(problem, self.problem.clone())
            .member(submission, self.submission.clone())
            .build()
    }

    /// Parse a container, requiring exactly the three members in order
    pub fn from_tar(data: &[u8]) -> Result<Self> {
        let members = read_tar_members(data)?;
        let names: Vec<&str> = members.iter().map(|(name, _)| name.as_str()).collect();
        if names != MEMBER_NAMES {
            return Err(QueueError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected submission members: {:?}", names),
            )));
        }
        let mut blobs = members.into_iter().map(|(_, data)| data);
        Ok(Self {
            driver: blobs.next().unwrap_or_default(),
            problem: blobs.next().unwrap_or_default(),
            submission: blobs.next().unwrap_or_default(),
        })
    }

    /// SHA-256 over member names and their unpacked file names and contents.
    ///
    /// Equal fingerprints mean equal layouts, whatever gzip headers say.
    pub fn fingerprint(&self) -> Result<String> {
        let mut hasher = Sha256::new();
        for (name, blob) in MEMBER_NAMES.iter().zip([&self.driver, &self.problem, &self.submission]) {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            for (path, contents) in read_tar_gz_files(blob)? {
                hasher.update(path.as_bytes());
                hasher.update([0u8]);
                hasher.update((contents.len() as u64).to_le_bytes());
                hasher.update(&contents);
            }
        }
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// Bundle three directories into a container written to `out`.
///
/// The container is staged next to `out` and only moved into place once
/// complete; the staging file is removed on failure.
pub fn build_submission_tar(
    driver_dir: &Path,
    problem_dir: &Path,
    submission_dir: &Path,
    out: &Path,
) -> Result<PathBuf> {
    let artifact = SubmissionArtifact::from_dirs(driver_dir, problem_dir, submission_dir)?;
    write_container(&artifact, out)?;
    info!(
        "Built submission container {} (driver={}, problem={}, submission={})",
        out.display(),
        driver_dir.display(),
        problem_dir.display(),
        submission_dir.display()
    );
    Ok(out.to_path_buf())
}

/// Synthesize the `submission.tgz` layer for a single program file.
///
/// The program is stored as `program<ext>`, keeping its extension (with
/// the dot) since the grading runtime dispatches on it.
pub fn build_submission_from_source(program_path: &Path, compiler_id: &str) -> Result<Vec<u8>> {
    let source = fs::read(program_path).map_err(|e| QueueError::packaging(program_path, e))?;
    let program_name = program_file_name(program_path);
    let manifest = format!("compiler_id: {}\n", compiler_id);
    tar_gz_files([
        (Path::new(&program_name), source.as_slice()),
        (Path::new(SUBMISSION_MANIFEST), manifest.as_bytes()),
    ])
}

/// Build a container from a grading-tests checkout using the problem's
/// accepted program (`AC.*`) for `language`
pub fn create_submission_tar(
    tests_dir: &Path,
    problem: &str,
    language: &str,
    driver: &str,
    out: &Path,
) -> Result<PathBuf> {
    let program = find_accepted_program(tests_dir, problem, language)?;
    create_submission_tar_from_path(&program, tests_dir, problem, language, driver, out)
}

/// Build a container from a grading-tests checkout with an explicit program
pub fn create_submission_tar_from_path(
    code_path: &Path,
    tests_dir: &Path,
    problem: &str,
    language: &str,
    driver: &str,
    out: &Path,
) -> Result<PathBuf> {
    let artifact = SubmissionArtifact {
        driver: tar_gz_dir(&tests_dir.join("drivers").join(driver).join(driver))?,
        problem: tar_gz_dir(&tests_dir.join("tests").join(problem).join("problem"))?,
        submission: build_submission_from_source(code_path, language)?,
    };
    write_container(&artifact, out)?;
    info!(
        "Built submission for problem={}, language={}, driver={}: {}",
        problem,
        language,
        driver,
        code_path.display()
    );
    Ok(out.to_path_buf())
}

fn find_accepted_program(tests_dir: &Path, problem: &str, language: &str) -> Result<PathBuf> {
    let lang_dir = tests_dir
        .join("tests")
        .join(problem)
        .join("languages")
        .join(language);
    let mut candidates: Vec<PathBuf> = fs::read_dir(&lang_dir)
        .map_err(|e| QueueError::packaging(&lang_dir, e))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("AC."))
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next().ok_or_else(|| {
        QueueError::packaging(
            &lang_dir,
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no AC program for {} in {}", problem, language),
            ),
        )
    })
}

/// `program` plus the source's extension, byte for byte
fn program_file_name(program_path: &Path) -> OsString {
    let mut name = OsString::from("program");
    if let Some(ext) = program_path.extension() {
        name.push(".");
        name.push(ext);
    }
    name
}

fn write_container(artifact: &SubmissionArtifact, out: &Path) -> Result<()> {
    let data = artifact.to_tar()?;
    let parent = match out.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut staging =
        tempfile::NamedTempFile::new_in(parent).map_err(|e| QueueError::packaging(parent, e))?;
    staging
        .write_all(&data)
        .map_err(|e| QueueError::packaging(staging.path(), e))?;
    staging
        .persist(out)
        .map_err(|e| QueueError::packaging(out, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::extract_tar_gz;
    use tempfile::TempDir;

    struct Fixture {
        root: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            let tree = [
                ("driver/judge.py", "print('judging')\n"),
                ("driver/lib/compilers.py", "COMPILERS = {}\n"),
                ("problem/handler.yml", "handler: std\n"),
                ("problem/sample.inp", ""),
                ("problem/sample.cor", "Hello world!\n"),
                ("submission/program.cc", "int main() {}\n"),
                ("submission/submission.yml", "compiler_id: G++\n"),
            ];
            for (rel, contents) in tree {
                let path = root.path().join(rel);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(path, contents).unwrap();
            }
            Self { root }
        }

        fn dir(&self, name: &str) -> PathBuf {
            self.root.path().join(name)
        }
    }

    #[test]
    fn test_build_submission_tar_round_trip() {
        let fx = Fixture::new();
        let out = fx.dir("submission.tar");
        build_submission_tar(&fx.dir("driver"), &fx.dir("problem"), &fx.dir("submission"), &out)
            .unwrap();

        let container = fs::read(&out).unwrap();
        let members = read_tar_members(&container).unwrap();
        let names: Vec<_> = members.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, MEMBER_NAMES);

        for ((_, blob), source) in members.iter().zip(["driver", "problem", "submission"]) {
            let dest = tempfile::tempdir().unwrap();
            extract_tar_gz(blob, dest.path()).unwrap();
            for (rel, contents) in read_tar_gz_files(blob).unwrap() {
                let original = fs::read(fx.dir(source).join(&rel)).unwrap();
                assert_eq!(contents, original, "{}/{}", source, rel);
                assert_eq!(fs::read(dest.path().join(&rel)).unwrap(), original);
            }
        }
    }

    #[test]
    fn test_build_submission_tar_missing_dir() {
        let fx = Fixture::new();
        let out = fx.dir("submission.tar");
        let result = build_submission_tar(
            &fx.dir("driver"),
            &fx.dir("no-such-problem"),
            &fx.dir("submission"),
            &out,
        );
        assert!(matches!(result, Err(QueueError::Packaging { .. })));
        assert!(!out.exists());
        // staging file must not be left behind either
        let leftovers: Vec<_> = fs::read_dir(fx.root.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_layout_is_deterministic() {
        let fx = Fixture::new();
        let first =
            SubmissionArtifact::from_dirs(&fx.dir("driver"), &fx.dir("problem"), &fx.dir("submission"))
                .unwrap();
        let second =
            SubmissionArtifact::from_dirs(&fx.dir("driver"), &fx.dir("problem"), &fx.dir("submission"))
                .unwrap();
        assert_eq!(first.fingerprint().unwrap(), second.fingerprint().unwrap());

        fs::write(fx.dir("problem/sample.cor"), "Hello, world!\n").unwrap();
        let changed =
            SubmissionArtifact::from_dirs(&fx.dir("driver"), &fx.dir("problem"), &fx.dir("submission"))
                .unwrap();
        assert_ne!(first.fingerprint().unwrap(), changed.fingerprint().unwrap());
    }

    #[test]
    fn test_from_source_preserves_extension() {
        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join("AC-iostream.cc");
        fs::write(&program, "#include <iostream>\n").unwrap();

        let blob = build_submission_from_source(&program, "G++").unwrap();
        let files = read_tar_gz_files(&blob).unwrap();
        let names: Vec<_> = files.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["program.cc", "submission.yml"]);
        assert_eq!(files["program.cc"], b"#include <iostream>\n");
        assert_eq!(files["submission.yml"], b"compiler_id: G++\n");
    }

    #[test]
    fn test_from_source_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join("Makefile");
        fs::write(&program, "all:\n").unwrap();

        let files = read_tar_gz_files(&build_submission_from_source(&program, "Make").unwrap()).unwrap();
        assert!(files.contains_key("program"));
    }

    #[cfg(unix)]
    #[test]
    fn test_from_source_keeps_non_utf8_extension() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join(OsStr::from_bytes(b"prog.c\xff"));
        fs::write(&program, "int main() {}\n").unwrap();

        let blob = build_submission_from_source(&program, "gcc").unwrap();
        let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(&blob[..]));
        let names: Vec<Vec<u8>> = archive
            .entries()
            .unwrap()
            .map(|entry| entry.unwrap().path_bytes().into_owned())
            .collect();
        assert_eq!(names, vec![b"program.c\xff".to_vec(), b"submission.yml".to_vec()]);
    }

    #[test]
    fn test_from_tar_rejects_wrong_members() {
        let data = ArchiveBuilder::new()
            .member("problem.tgz", Vec::new())
            .member("driver.tgz", Vec::new())
            .member("submission.tgz", Vec::new())
            .build()
            .unwrap();
        assert!(SubmissionArtifact::from_tar(&data).is_err());
    }

    #[test]
    fn test_create_submission_tar_from_checkout() {
        let root = tempfile::tempdir().unwrap();
        let tests_dir = root.path();
        let files = [
            ("drivers/std/std/judge.py", "judge\n"),
            ("tests/hello-world/problem/sample.cor", "Hello world!\n"),
            ("tests/hello-world/languages/P1++/AC.cc", "int main() {}\n"),
            ("tests/hello-world/languages/P1++/WA.cc", "int main() { return 1; }\n"),
        ];
        for (rel, contents) in files {
            let path = tests_dir.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }

        let out = root.path().join("submission.tar");
        create_submission_tar(tests_dir, "hello-world", "P1++", "std", &out).unwrap();

        let artifact = SubmissionArtifact::from_tar(&fs::read(&out).unwrap()).unwrap();
        let submission = read_tar_gz_files(&artifact.submission).unwrap();
        assert_eq!(submission["program.cc"], b"int main() {}\n");
        assert_eq!(submission["submission.yml"], b"compiler_id: P1++\n");
        let driver = read_tar_gz_files(&artifact.driver).unwrap();
        assert!(driver.contains_key("judge.py"));
    }
}
