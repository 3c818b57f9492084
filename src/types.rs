//! Core data model: spec.md §3.
//!
//! Shapes mirror the teacher's `infrastructure/jobs/types.rs` (small
//! newtype IDs, `Serialize + Deserialize` on everything that crosses a
//! queue/store boundary, a `Display` impl on enums used in log lines).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// A content-addressed file identity. The spec calls this `sha256`; we
/// keep it as an opaque string rather than a fixed-size byte array because
/// nothing in the dispatcher inspects the bytes, only compares/hashes them.
pub type Sha256 = String;

/// Mandatory category: services in this category are always scheduled and
/// can never be excluded (spec.md §4.1 step 3).
pub const SYSTEM_CATEGORY: &str = "system";

/// Service descriptor, external and read-only to the dispatcher (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub category: String,
    pub stage: String,
    /// Empty means "matches any file type".
    pub accepts: Vec<String>,
    pub rejects: Vec<String>,
    /// Dispatch re-issue window, in seconds; also the service's own timeout.
    pub timeout_secs: u64,
    pub submission_params: Vec<SubmissionParamSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionParamSpec {
    pub name: String,
    pub default: serde_json::Value,
}

/// The service catalog is read once per dispatch pass and treated as a
/// stable snapshot for the duration of that pass (spec.md §9: "do not
/// introduce local caches that outlive a single dispatch call except for
/// the already-specified `all_services` catalog snapshot").
#[derive(Debug, Clone, Default)]
pub struct ServiceCatalog {
    pub services: Vec<ServiceDescriptor>,
}

impl ServiceCatalog {
    pub fn get(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn by_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a ServiceDescriptor> {
        self.services.iter().filter(move |s| s.category == category)
    }
}

/// Submission-level dispatch parameters (spec.md §3 `params.*`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SubmissionParams {
    #[serde(default)]
    pub selected_services: Vec<String>,
    #[serde(default)]
    pub excluded_services: Vec<String>,
    #[serde(default)]
    pub service_spec: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    pub max_extracted: u32,
    #[serde(default)]
    pub ignore_filtering: bool,
    #[serde(default)]
    pub classification: String,
    pub quota_item: Option<String>,
    pub submitter: Option<String>,
    pub psid: Option<String>,
}

/// A file entry listed directly in a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionFile {
    pub sha256: Sha256,
}

/// A submission: a user-level request to analyze a set of files (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub sid: String,
    pub files: Vec<SubmissionFile>,
    pub params: SubmissionParams,
    pub expiry_ts: Option<chrono::DateTime<chrono::Utc>>,

    // Written only on finalization; absent/default until then.
    #[serde(default)]
    pub classification: String,
    #[serde(default)]
    pub error_count: u32,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub file_count: u32,
    #[serde(default)]
    pub results: Vec<String>,
    #[serde(default)]
    pub max_score: i64,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Submission {
    /// `max_files` is the submission's total extraction budget: the roots
    /// already count against it (spec.md §3 `FileTask.max_files`).
    pub fn max_files(&self) -> u32 {
        self.files.len() as u32 + self.params.max_extracted
    }

    /// Key used to tag a `FileScore` cache entry, mirroring
    /// `submission.create_filescore_key` in spec.md §6.
    pub fn create_filescore_key(&self, file_hash: &str) -> String {
        format!("fs/{}/{}", self.sid, file_hash)
    }
}

/// Cached file metadata (spec.md §3 "File info"), looked up from the
/// external metadata datastore; absence is a normal, logged condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub sha256: Sha256,
    pub magic: Option<String>,
    pub md5: Option<String>,
    pub mime: Option<String>,
    pub sha1: Option<String>,
    pub size: u64,
    #[serde(rename = "type")]
    pub file_type: String,
}

/// The in-flight envelope for a submission (spec.md §3 `SubmissionTask`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionTask {
    pub submission: Submission,
    pub completed_queue: Option<String>,
}

/// The in-flight envelope for one file inside a submission (spec.md §3
/// `FileTask`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTask {
    pub sid: String,
    /// Defined but never populated by the dispatcher for extracted
    /// children (spec.md §9 open question) — left optional and passed
    /// through unchanged wherever it is already present.
    pub parent_hash: Option<Sha256>,
    pub file_info: FileInfo,
    pub depth: u32,
    pub max_files: u32,
}

/// ServiceTask payload pushed to `service-queue-<name>` (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceTask {
    pub sid: String,
    pub service_name: String,
    pub service_config: String, // JSON string, per spec.md §6
    pub fileinfo: FileInfo,
    pub depth: u32,
    pub max_files: u32,
}

/// Minimal submission-queue message: `{sid}` (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRef {
    pub sid: String,
}

/// Which outcome bucket a finish record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Result,
    Error,
    /// Anything else the store happens to contain — logged as an anomaly,
    /// counted in neither totals list (spec.md §7 "Bucket anomaly").
    #[serde(other)]
    Unknown,
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Result => write!(f, "result"),
            Self::Error => write!(f, "error"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Written by the external service worker on completion of a (sha256,
/// service) pair — never by the dispatcher itself (spec.md §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishRecord {
    pub bucket: Bucket,
    /// External id of the artifact (a result or error key).
    pub key: String,
    pub score: i64,
    pub drop: bool,
    pub classification: String,
    /// Content ids of files this result extracted, if any (spec.md §4.3
    /// step 6 "enumerate its extracted children").
    #[serde(default)]
    pub extracted: Vec<Sha256>,
}

impl FinishRecord {
    pub fn is_error(&self) -> bool {
        matches!(self.bucket, Bucket::Error)
    }
}

/// FileScore cache record (spec.md §3/§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileScore {
    pub psid: Option<String>,
    pub expiry_ts: Option<chrono::DateTime<chrono::Utc>>,
    pub score: i64,
    pub errors: u32,
    pub sid: String,
    pub time: chrono::DateTime<chrono::Utc>,
}

/// A schedule: an ordered list of stages, each an ordered list of service
/// names (spec.md §3 `schedules`).
pub type Schedule = Vec<Vec<String>>;

/// A set of distinct category names, used while expanding `excluded`/
/// `selected` category references. spec.md §9's open question calls out
/// that the original clamps this via a string mutation; we use a real set.
pub type CategorySet = HashSet<String>;
