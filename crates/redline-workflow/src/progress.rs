//! Read-only view of a job for polling callers.

use redline_core::job::{GenerationJob, JobStatus, Step};
use redline_core::usage::{CallUsage, UsageTotals};
use serde::Serialize;

/// Status line shown for a step.
pub fn progress_message(step: Step, current_section: usize) -> String {
    match step {
        Step::Intro => "Starting editing...".to_string(),
        Step::Sections => format!("Editing section {}...", current_section + 1),
        Step::Summary => "Final touches...".to_string(),
        Step::Complete => "Edit complete!".to_string(),
    }
}

/// What a poller sees.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressReport {
    pub process_id: String,
    pub status: JobStatus,
    pub step: Step,
    pub progress: u8,
    /// Edited document, only once the job is complete.
    pub content: Option<String>,
    pub error: Option<String>,
    pub message: String,
    pub last_usage: Option<CallUsage>,
    pub document_totals: Option<UsageTotals>,
}

impl ProgressReport {
    pub fn from_job(job: &GenerationJob) -> Self {
        Self {
            process_id: job.id.to_string(),
            status: job.status,
            step: job.step,
            progress: job.progress,
            content: (job.status == JobStatus::Complete).then(|| job.content.clone()),
            error: job.error.clone(),
            message: progress_message(job.step, job.current_section),
            last_usage: job.last_usage.clone(),
            document_totals: job.document_totals.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use redline_core::job::JobId;

    #[test]
    fn test_messages() {
        assert_eq!(progress_message(Step::Intro, 0), "Starting editing...");
        assert_eq!(progress_message(Step::Sections, 2), "Editing section 3...");
        assert_eq!(progress_message(Step::Summary, 5), "Final touches...");
        assert_eq!(progress_message(Step::Complete, 5), "Edit complete!");
    }

    #[test]
    fn test_content_hidden_until_complete() {
        let mut job = GenerationJob::new(JobId::generate(), 1, "T", "src", Utc::now());
        job.content = "partial\n\n".to_string();
        let report = ProgressReport::from_job(&job);
        assert_eq!(report.content, None);
        assert_eq!(report.message, "Starting editing...");

        job.status = JobStatus::Complete;
        job.step = Step::Complete;
        let report = ProgressReport::from_job(&job);
        assert_eq!(report.content.as_deref(), Some("partial\n\n"));
    }

    #[test]
    fn test_report_serializes_lowercase_status() {
        let job = GenerationJob::new(JobId::generate(), 1, "T", "src", Utc::now());
        let json = serde_json::to_value(ProgressReport::from_job(&job)).unwrap();
        assert_eq!(json["status"], "processing");
        assert_eq!(json["step"], "intro");
        assert_eq!(json["progress"], 0);
    }
}
