//! Verdicts and result artifact decoding
//!
//! A result artifact is a gzip tar holding `correction.yml`. Polled output
//! files and callback bodies share this format and both go through
//! `decode_verdict`.

use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::archive::extract_tar_gz;
use crate::error::{QueueError, Result};

/// Manifest written by the grading system
pub const CORRECTION_MANIFEST: &str = "correction.yml";

/// Known verdict codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictCode {
    #[serde(rename = "AC")]
    Accepted,
    #[serde(rename = "WA")]
    WrongAnswer,
    #[serde(rename = "PE")]
    PresentationError,
    #[serde(rename = "CE")]
    CompileError,
    #[serde(rename = "SE")]
    SystemError,
    #[serde(rename = "EE")]
    ExecutionError,
    #[serde(rename = "IC")]
    InternalCheck,
}

impl VerdictCode {
    pub const ALL: [VerdictCode; 7] = [
        VerdictCode::Accepted,
        VerdictCode::WrongAnswer,
        VerdictCode::PresentationError,
        VerdictCode::CompileError,
        VerdictCode::SystemError,
        VerdictCode::ExecutionError,
        VerdictCode::InternalCheck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictCode::Accepted => "AC",
            VerdictCode::WrongAnswer => "WA",
            VerdictCode::PresentationError => "PE",
            VerdictCode::CompileError => "CE",
            VerdictCode::SystemError => "SE",
            VerdictCode::ExecutionError => "EE",
            VerdictCode::InternalCheck => "IC",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_str() == code)
    }
}

impl fmt::Display for VerdictCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Verdict string exactly as the grading system reported it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Verdict(String);

impl Verdict {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The code, if it belongs to the known vocabulary
    pub fn code(&self) -> Option<VerdictCode> {
        VerdictCode::parse(&self.0)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<VerdictCode> for Verdict {
    fn from(code: VerdictCode) -> Self {
        Verdict(code.as_str().to_string())
    }
}

impl PartialEq<&str> for Verdict {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// `correction.yml`; `veredict` is the wire name, `verdict` a legacy
/// spelling consulted only when `veredict` is absent
#[derive(Debug, Deserialize)]
struct Correction {
    veredict: Option<serde_yaml::Value>,
    verdict: Option<serde_yaml::Value>,
}

/// Extract the verdict from a result artifact
pub fn decode_verdict(archive: &[u8]) -> Result<Verdict> {
    let temp_dir = tempfile::tempdir()?;
    extract_tar_gz(archive, temp_dir.path())
        .map_err(|e| QueueError::MalformedResult(format!("cannot unpack result archive: {}", e)))?;
    read_correction(&temp_dir.path().join(CORRECTION_MANIFEST))
}

/// Extract the verdict from a result artifact on disk
pub fn decode_verdict_file(path: &Path) -> Result<Verdict> {
    let data = std::fs::read(path)?;
    decode_verdict(&data)
}

fn read_correction(manifest: &Path) -> Result<Verdict> {
    let content = std::fs::read_to_string(manifest).map_err(|e| {
        QueueError::MalformedResult(format!("missing {}: {}", CORRECTION_MANIFEST, e))
    })?;
    parse_correction(&content)
}

fn parse_correction(content: &str) -> Result<Verdict> {
    let correction: Correction = serde_yaml::from_str(content)
        .map_err(|e| QueueError::MalformedResult(format!("unparsable {}: {}", CORRECTION_MANIFEST, e)))?;

    let verdict = match correction.veredict.or(correction.verdict) {
        Some(serde_yaml::Value::String(s)) => s,
        Some(other) => {
            return Err(QueueError::MalformedResult(format!(
                "verdict is not a string: {:?}",
                other
            )))
        }
        None => {
            return Err(QueueError::MalformedResult(format!(
                "{} has no veredict field",
                CORRECTION_MANIFEST
            )))
        }
    };
    debug!("Decoded verdict {}", verdict);
    Ok(Verdict(verdict))
}

/// Expected verdict encoded in a test program name: `WA-overflow.cc` → `WA`
pub fn verdict_from_filename(filename: &str) -> Result<Verdict> {
    static VERDICT_FILENAME: OnceLock<Regex> = OnceLock::new();
    let re = VERDICT_FILENAME
        .get_or_init(|| Regex::new(r"^(\w+)(-.*)?\..*$").expect("verdict filename pattern"));
    re.captures(filename)
        .and_then(|caps| caps.get(1))
        .map(|m| Verdict(m.as_str().to_string()))
        .ok_or_else(|| QueueError::InvalidVerdictFilename(filename.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tar_gz_files;

    fn result_archive(manifest: &str) -> Vec<u8> {
        tar_gz_files([
            (CORRECTION_MANIFEST, manifest.as_bytes()),
            ("output.txt", b"Hello world!\n".as_slice()),
        ])
        .unwrap()
    }

    #[test]
    fn test_decode_verdict() {
        let archive = result_archive("veredict: AC\nveredict_info: ok\n");
        assert_eq!(decode_verdict(&archive).unwrap(), "AC");
    }

    #[test]
    fn test_decode_accepts_legacy_spelling() {
        let archive = result_archive("verdict: WA\n");
        let verdict = decode_verdict(&archive).unwrap();
        assert_eq!(verdict.code(), Some(VerdictCode::WrongAnswer));
    }

    #[test]
    fn test_decode_with_both_spellings_prefers_veredict() {
        let archive = result_archive("veredict: AC\nverdict: AC\n");
        assert_eq!(decode_verdict(&archive).unwrap(), "AC");

        let archive = result_archive("verdict: WA\nveredict: PE\n");
        assert_eq!(decode_verdict(&archive).unwrap(), "PE");
    }

    #[test]
    fn test_decode_unknown_code_is_verbatim() {
        let archive = result_archive("veredict: XY\n");
        let verdict = decode_verdict(&archive).unwrap();
        assert_eq!(verdict.as_str(), "XY");
        assert_eq!(verdict.code(), None);
    }

    #[test]
    fn test_decode_missing_manifest() {
        let archive = tar_gz_files([("output.txt", b"".as_slice())]).unwrap();
        assert!(matches!(
            decode_verdict(&archive),
            Err(QueueError::MalformedResult(_))
        ));
    }

    #[test]
    fn test_decode_missing_field() {
        let archive = result_archive("time: 0.1\n");
        assert!(matches!(
            decode_verdict(&archive),
            Err(QueueError::MalformedResult(_))
        ));
    }

    #[test]
    fn test_decode_garbage_archive() {
        assert!(matches!(
            decode_verdict(b"definitely not gzip"),
            Err(QueueError::MalformedResult(_))
        ));
    }

    #[test]
    fn test_verdict_from_filename() {
        assert_eq!(verdict_from_filename("AC.cc").unwrap(), "AC");
        assert_eq!(verdict_from_filename("WA-off-by-one.py").unwrap(), "WA");
        assert_eq!(verdict_from_filename("EE-tle.java").unwrap(), "EE");
    }

    #[test]
    fn test_verdict_from_filename_rejects() {
        for name in ["README", "-x.cc", ""] {
            assert!(matches!(
                verdict_from_filename(name),
                Err(QueueError::InvalidVerdictFilename(_))
            ));
        }
    }

    #[test]
    fn test_code_round_trip_through_display() {
        for code in VerdictCode::ALL {
            assert_eq!(VerdictCode::parse(&code.to_string()), Some(code));
        }
    }
}
