//! The persisted state of one resumable editing job.

use crate::usage::{CallUsage, UsageTotals};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque process id, safe to use as a file name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    const PREFIX: &str = "gen_";

    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(format!("{}{}", Self::PREFIX, uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rejected process id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid process id '{0}'")]
pub struct InvalidJobId(pub String);

impl TryFrom<String> for JobId {
    type Error = InvalidJobId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let valid = !value.is_empty()
            && value.len() <= 128
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if valid {
            Ok(Self(value))
        } else {
            Err(InvalidJobId(value))
        }
    }
}

impl std::str::FromStr for JobId {
    type Err = InvalidJobId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.trim().to_string())
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Complete,
    Error,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }
}

/// Workflow position. Steps only ever move forward in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Intro,
    Sections,
    Summary,
    Complete,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Intro => "intro",
            Self::Sections => "sections",
            Self::Summary => "summary",
            Self::Complete => "complete",
        }
    }
}

/// One editing job, persisted after every step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: JobId,
    pub document_id: u64,
    pub title: String,
    pub source_text: String,
    pub status: JobStatus,
    pub step: Step,
    pub progress: u8,
    /// Edited output, one chunk appended per completed editing step.
    pub content: String,
    /// Chunks to edit after the intro, fixed once the intro step has run.
    #[serde(default)]
    pub sections: Vec<String>,
    #[serde(default)]
    pub current_section: usize,
    #[serde(default)]
    pub last_usage: Option<CallUsage>,
    /// Document totals right after the most recent usage was recorded.
    #[serde(default)]
    pub document_totals: Option<UsageTotals>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GenerationJob {
    pub fn new(
        id: JobId,
        document_id: u64,
        title: impl Into<String>,
        source_text: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            document_id,
            title: title.into(),
            source_text: source_text.into(),
            status: JobStatus::Processing,
            step: Step::Intro,
            progress: 0,
            content: String::new(),
            sections: Vec::new(),
            current_section: 0,
            last_usage: None,
            document_totals: None,
            error: None,
            expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Complete or failed; no further steps will run.
    pub fn is_terminal(&self) -> bool {
        self.status != JobStatus::Processing || self.step == Step::Complete
    }

    /// Past its grace window and due for purging.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Number of sections that will actually be edited.
    pub fn section_bound(&self, max_sections: usize) -> usize {
        self.sections.len().min(max_sections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique_and_valid() {
        let a = JobId::generate();
        let b = JobId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("gen_"));
        assert_eq!(a.as_str().parse::<JobId>().unwrap(), a);
    }

    #[test]
    fn test_path_like_ids_are_rejected() {
        assert!("../etc/passwd".parse::<JobId>().is_err());
        assert!("".parse::<JobId>().is_err());
        assert!("a b".parse::<JobId>().is_err());
    }

    #[test]
    fn test_new_job_starts_at_intro() {
        let job = GenerationJob::new(JobId::generate(), 1, "T", "body", Utc::now());
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.step, Step::Intro);
        assert_eq!(job.progress, 0);
        assert!(!job.is_terminal());
    }

    #[test]
    fn test_step_order() {
        assert!(Step::Intro < Step::Sections);
        assert!(Step::Sections < Step::Summary);
        assert!(Step::Summary < Step::Complete);
    }

    #[test]
    fn test_job_serializes_lowercase_enums() {
        let job = GenerationJob::new(JobId::generate(), 1, "T", "body", Utc::now());
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["status"], "processing");
        assert_eq!(json["step"], "intro");
        let back: GenerationJob = serde_json::from_value(json).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let mut job = GenerationJob::new(JobId::generate(), 1, "T", "body", now);
        assert!(!job.is_expired(now));
        job.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(job.is_expired(now));
    }
}
