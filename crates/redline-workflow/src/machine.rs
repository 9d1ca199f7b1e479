//! Pure step logic for an editing job.
//!
//! [`plan`] decides what outside work the current step needs. The executor
//! performs it and reports back with an [`Event`]. [`transition`] folds the
//! event into the job and returns the follow-up [`Effect`]s. Neither function
//! does any I/O.

use chrono::{DateTime, Duration, Utc};
use redline_core::job::{GenerationJob, JobId, JobStatus, Step};
use redline_core::segment::{SegmentError, segment};
use redline_core::usage::{CallUsage, UsageTotals};

/// Progress reported once the intro has been edited.
pub const INTRO_PROGRESS: u8 = 15;
/// Progress span shared by the section edits.
const SECTIONS_SPAN: f64 = 80.0;

/// Bounds applied by the step logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_sections: usize,
    pub require_sections: bool,
    /// How long a completed job stays pollable.
    pub grace: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_sections: 16,
            require_sections: true,
            grace: Duration::seconds(180),
        }
    }
}

/// Outside work needed by the job's current step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Edit the intro; `sections` are stored once the edit succeeds.
    EditIntro { intro: String, sections: Vec<String> },
    /// Edit one section (0-based).
    EditSection { index: usize, chunk: String },
    /// No provider call needed; feed [`Event::Proceed`].
    Proceed,
    /// The input cannot be processed; feed [`Event::Failed`].
    Reject { message: String },
    /// Terminal job, nothing to do.
    Idle,
}

/// Result of the outside work for one step.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    IntroEdited {
        edit: String,
        sections: Vec<String>,
        usage: Option<CallUsage>,
        totals: Option<UsageTotals>,
    },
    SectionEdited {
        edit: String,
        usage: Option<CallUsage>,
        totals: Option<UsageTotals>,
    },
    Proceed,
    Failed {
        message: String,
        usage: Option<CallUsage>,
        totals: Option<UsageTotals>,
    },
}

impl Event {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            usage: None,
            totals: None,
        }
    }
}

/// Follow-up work requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Run the next step of this job.
    ScheduleNext(JobId),
    /// Delete this job at the given time.
    SchedulePurge { id: JobId, at: DateTime<Utc> },
}

/// Work out what the job's current step needs.
pub fn plan(job: &GenerationJob, limits: &Limits) -> Plan {
    if job.is_terminal() {
        return Plan::Idle;
    }
    match job.step {
        Step::Intro => {
            let segments = segment(&job.source_text);
            if limits.require_sections
                && let Err(SegmentError::NoSectionsFound) = segments.require_sections()
            {
                return Plan::Reject {
                    message: "No sections found in document".to_string(),
                };
            }
            Plan::EditIntro {
                intro: segments.intro.trim().to_string(),
                sections: segments.sections.iter().map(|s| s.prompt_text()).collect(),
            }
        }
        Step::Sections => {
            let index = job.current_section;
            if index < job.section_bound(limits.max_sections) {
                Plan::EditSection {
                    index,
                    chunk: job.sections[index].clone(),
                }
            } else {
                Plan::Proceed
            }
        }
        Step::Summary => Plan::Proceed,
        Step::Complete => Plan::Idle,
    }
}

/// Progress after `done` of `bound` sections have been edited.
pub fn section_progress(done: usize, bound: usize) -> u8 {
    if bound == 0 {
        return INTRO_PROGRESS;
    }
    let fraction = done.min(bound) as f64 / bound as f64;
    (f64::from(INTRO_PROGRESS) + SECTIONS_SPAN * fraction).round() as u8
}

fn append_edit(job: &mut GenerationJob, edit: &str) {
    job.content.push_str(edit);
    job.content.push_str("\n\n");
}

fn set_progress(job: &mut GenerationJob, progress: u8) {
    job.progress = job.progress.max(progress.min(100));
}

fn record_usage(job: &mut GenerationJob, usage: Option<CallUsage>, totals: Option<UsageTotals>) {
    if usage.is_some() {
        job.last_usage = usage;
    }
    if totals.is_some() {
        job.document_totals = totals;
    }
}

/// Terminal jobs stay pollable until `at`, then get purged.
fn schedule_expiry(job: &mut GenerationJob, at: DateTime<Utc>) -> Effect {
    job.expires_at = Some(at);
    Effect::SchedulePurge {
        id: job.id.clone(),
        at,
    }
}

/// Fold an event into the job.
///
/// Events that do not match the job's step (or arrive after it finished) are
/// ignored and produce no effects.
pub fn transition(
    mut job: GenerationJob,
    event: Event,
    limits: &Limits,
    now: DateTime<Utc>,
) -> (GenerationJob, Vec<Effect>) {
    if job.is_terminal() {
        return (job, Vec::new());
    }

    let mut effects = Vec::new();
    match (job.step, event) {
        (
            Step::Intro,
            Event::IntroEdited {
                edit,
                sections,
                usage,
                totals,
            },
        ) => {
            record_usage(&mut job, usage, totals);
            append_edit(&mut job, &edit);
            job.sections = sections;
            job.current_section = 0;
            set_progress(&mut job, INTRO_PROGRESS);
            job.step = if job.section_bound(limits.max_sections) == 0 {
                Step::Summary
            } else {
                Step::Sections
            };
            effects.push(Effect::ScheduleNext(job.id.clone()));
        }
        (
            Step::Sections,
            Event::SectionEdited {
                edit,
                usage,
                totals,
            },
        ) => {
            let bound = job.section_bound(limits.max_sections);
            if job.current_section >= bound {
                return (job, effects);
            }
            record_usage(&mut job, usage, totals);
            append_edit(&mut job, &edit);
            let done = job.current_section + 1;
            job.current_section = done;
            set_progress(&mut job, section_progress(done, bound));
            if done >= bound {
                job.step = Step::Summary;
            }
            effects.push(Effect::ScheduleNext(job.id.clone()));
        }
        (Step::Sections, Event::Proceed) => {
            if job.current_section < job.section_bound(limits.max_sections) {
                return (job, effects);
            }
            job.step = Step::Summary;
            effects.push(Effect::ScheduleNext(job.id.clone()));
        }
        (Step::Summary, Event::Proceed) => {
            job.step = Step::Complete;
            job.status = JobStatus::Complete;
            job.progress = 100;
            effects.push(schedule_expiry(&mut job, now + limits.grace));
        }
        (
            _,
            Event::Failed {
                message,
                usage,
                totals,
            },
        ) => {
            record_usage(&mut job, usage, totals);
            job.status = JobStatus::Error;
            job.error = Some(message);
            effects.push(schedule_expiry(&mut job, now + limits.grace));
        }
        _ => return (job, effects),
    }

    job.updated_at = now;
    (job, effects)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "Intro text.\n\nOne\n---\nBody one.\n\nTwo\n---\nBody two.\n";

    fn job(source: &str) -> GenerationJob {
        GenerationJob::new(JobId::generate(), 1, "Title", source, Utc::now())
    }

    fn usage(prompt: u64) -> Option<CallUsage> {
        Some(CallUsage {
            prompt_tokens: prompt,
            completion_tokens: 1,
            total_tokens: prompt + 1,
            cost: 0.0,
            model: "gpt-4o".to_string(),
        })
    }

    fn intro_event(sections: Vec<String>) -> Event {
        Event::IntroEdited {
            edit: "Edited intro.".to_string(),
            sections,
            usage: usage(10),
            totals: None,
        }
    }

    fn section_event(edit: &str) -> Event {
        Event::SectionEdited {
            edit: edit.to_string(),
            usage: usage(5),
            totals: None,
        }
    }

    #[test]
    fn test_plan_intro_segments_document() {
        let job = job(DOC);
        match plan(&job, &Limits::default()) {
            Plan::EditIntro { intro, sections } => {
                assert_eq!(intro, "Intro text.");
                assert_eq!(sections, vec!["One\n---\nBody one.", "Two\n---\nBody two."]);
            }
            other => panic!("unexpected plan {:?}", other),
        }
    }

    #[test]
    fn test_plan_rejects_sectionless_document_when_required() {
        let job = job("No headings at all.");
        assert!(matches!(
            plan(&job, &Limits::default()),
            Plan::Reject { .. }
        ));

        let relaxed = Limits {
            require_sections: false,
            ..Limits::default()
        };
        assert_eq!(
            plan(&job, &relaxed),
            Plan::EditIntro {
                intro: "No headings at all.".to_string(),
                sections: Vec::new(),
            }
        );
    }

    #[test]
    fn test_intro_transition() {
        let limits = Limits::default();
        let now = Utc::now();
        let (job, effects) = transition(
            job(DOC),
            intro_event(vec!["a".into(), "b".into()]),
            &limits,
            now,
        );
        assert_eq!(job.step, Step::Sections);
        assert_eq!(job.progress, 15);
        assert_eq!(job.content, "Edited intro.\n\n");
        assert_eq!(job.sections.len(), 2);
        assert_eq!(job.last_usage.as_ref().map(|u| u.prompt_tokens), Some(10));
        assert_eq!(job.updated_at, now);
        assert_eq!(effects, vec![Effect::ScheduleNext(job.id.clone())]);
    }

    #[test]
    fn test_sections_progress_and_summary() {
        let limits = Limits::default();
        let now = Utc::now();
        let (job, _) = transition(
            job(DOC),
            intro_event(vec!["a".into(), "b".into()]),
            &limits,
            now,
        );

        let (job, _) = transition(job, section_event("A."), &limits, now);
        assert_eq!(job.current_section, 1);
        assert_eq!(job.progress, 55);
        assert_eq!(job.step, Step::Sections);

        let (job, effects) = transition(job, section_event("B."), &limits, now);
        assert_eq!(job.current_section, 2);
        assert_eq!(job.progress, 95);
        assert_eq!(job.step, Step::Summary);
        assert_eq!(job.content, "Edited intro.\n\nA.\n\nB.\n\n");
        assert_eq!(effects.len(), 1);
    }

    #[test]
    fn test_section_count_is_capped() {
        let limits = Limits {
            max_sections: 2,
            ..Limits::default()
        };
        let now = Utc::now();
        let sections = vec!["a".into(), "b".into(), "c".into()];
        let (job, _) = transition(job(DOC), intro_event(sections), &limits, now);
        let (job, _) = transition(job, section_event("A."), &limits, now);
        let (job, _) = transition(job, section_event("B."), &limits, now);
        assert_eq!(job.step, Step::Summary);
        assert_eq!(job.progress, 95);
        assert_eq!(plan(&job, &limits), Plan::Proceed);
    }

    #[test]
    fn test_zero_sections_go_straight_to_summary() {
        let limits = Limits {
            require_sections: false,
            ..Limits::default()
        };
        let (job, _) = transition(job("plain"), intro_event(Vec::new()), &limits, Utc::now());
        assert_eq!(job.step, Step::Summary);
        assert_eq!(job.progress, 15);
    }

    #[test]
    fn test_summary_completes_and_schedules_purge() {
        let limits = Limits::default();
        let now = Utc::now();
        let mut job = job(DOC);
        job.step = Step::Summary;
        job.progress = 95;

        let (job, effects) = transition(job, Event::Proceed, &limits, now);
        assert_eq!(job.step, Step::Complete);
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.progress, 100);
        let expires = now + Duration::seconds(180);
        assert_eq!(job.expires_at, Some(expires));
        assert_eq!(
            effects,
            vec![Effect::SchedulePurge {
                id: job.id.clone(),
                at: expires
            }]
        );
        assert_eq!(plan(&job, &limits), Plan::Idle);
    }

    #[test]
    fn test_failure_is_terminal() {
        let limits = Limits::default();
        let (job, effects) = transition(
            job(DOC),
            Event::failed("Failed to generate introduction"),
            &limits,
            Utc::now(),
        );
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error.as_deref(), Some("Failed to generate introduction"));
        assert!(job.is_terminal());
        let expires = job.expires_at.expect("failed jobs expire");
        assert_eq!(
            effects,
            vec![Effect::SchedulePurge {
                id: job.id.clone(),
                at: expires
            }]
        );

        let (after, effects) = transition(job.clone(), Event::Proceed, &limits, Utc::now());
        assert_eq!(after, job);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_mismatched_event_is_ignored() {
        let limits = Limits::default();
        let original = job(DOC);
        let (job, effects) = transition(original.clone(), section_event("x"), &limits, Utc::now());
        assert_eq!(job, original);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_section_progress_rounding() {
        assert_eq!(section_progress(1, 3), 42);
        assert_eq!(section_progress(2, 3), 68);
        assert_eq!(section_progress(3, 3), 95);
        assert_eq!(section_progress(1, 16), 20);
    }
}
