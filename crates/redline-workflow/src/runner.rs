//! Executes workflow steps: provider calls, usage accounting, persistence and
//! scheduling around the pure transitions in [`crate::machine`].

use crate::error::WorkflowError;
use crate::machine::{Effect, Event, Limits, Plan, plan, transition};
use crate::progress::ProgressReport;
use crate::prompts::PromptPair;
use crate::scheduler::{Scheduler, Task, TaskQueue};
use chrono::{DateTime, Duration, Utc};
use redline_core::config::RedlineConfig;
use redline_core::job::{GenerationJob, JobId, JobStatus, Step};
use redline_core::storage::JobStore;
use redline_core::usage::{CallUsage, GlobalTotals, UsageLedger, UsageTotals};
use redline_llm::{LlmClient, ProviderError, create_client, create_offline_client};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// Produces a freshly configured client for each step.
pub trait ClientFactory: Send + Sync {
    fn client(&self) -> LlmClient;
}

impl<F> ClientFactory for F
where
    F: Fn() -> LlmClient + Send + Sync,
{
    fn client(&self) -> LlmClient {
        self()
    }
}

/// Clients built from a [`RedlineConfig`].
pub struct ConfiguredClients {
    config: RedlineConfig,
    offline: bool,
}

impl ConfiguredClients {
    pub fn new(config: RedlineConfig) -> Self {
        Self {
            config,
            offline: false,
        }
    }

    /// Echo prompts back instead of calling a provider.
    pub fn offline(config: RedlineConfig) -> Self {
        Self {
            config,
            offline: true,
        }
    }
}

impl ClientFactory for ConfiguredClients {
    fn client(&self) -> LlmClient {
        if self.offline {
            create_offline_client(&self.config)
        } else {
            create_client(&self.config)
        }
    }
}

/// Step-level settings.
#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    pub limits: Limits,
    pub prompts: PromptPair,
    /// Edit through the continuation loop.
    pub continuation: bool,
}

impl WorkflowOptions {
    pub fn from_config(config: &RedlineConfig) -> Self {
        Self {
            limits: Limits {
                max_sections: config.workflow.max_sections,
                require_sections: config.workflow.require_sections,
                grace: i64::try_from(config.workflow.grace_secs)
                    .ok()
                    .and_then(Duration::try_seconds)
                    .unwrap_or_else(|| Limits::default().grace),
            },
            prompts: PromptPair::resolve(&config.prompts),
            continuation: config.continuation.enabled,
        }
    }
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self::from_config(&RedlineConfig::default())
    }
}

/// One mutex per job id so two steps of the same job never overlap.
#[derive(Default)]
struct JobLocks {
    inner: Mutex<HashMap<JobId, Arc<Mutex<()>>>>,
}

impl JobLocks {
    fn get(&self, id: &JobId) -> Arc<Mutex<()>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.clone())
            .or_default()
            .clone()
    }

    fn forget(&self, id: &JobId) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }
}

/// Result of one provider edit.
struct EditOutcome {
    result: Result<String, String>,
    usage: Option<CallUsage>,
    totals: Option<UsageTotals>,
}

/// What a sweep over every stored job did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Jobs advanced, with the step and progress they reached.
    pub advanced: Vec<(JobId, Step, u8)>,
    pub purged: Vec<JobId>,
    pub failed: Vec<(JobId, String)>,
}

pub struct Workflow {
    jobs: Arc<dyn JobStore>,
    ledger: Arc<UsageLedger>,
    clients: Arc<dyn ClientFactory>,
    scheduler: Arc<dyn Scheduler>,
    options: WorkflowOptions,
    locks: JobLocks,
}

impl Workflow {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        ledger: Arc<UsageLedger>,
        clients: Arc<dyn ClientFactory>,
        scheduler: Arc<dyn Scheduler>,
        options: WorkflowOptions,
    ) -> Self {
        Self {
            jobs,
            ledger,
            clients,
            scheduler,
            options,
            locks: JobLocks::default(),
        }
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    /// Create a job and schedule its first step.
    pub fn submit(
        &self,
        title: &str,
        source_text: &str,
        document_id: u64,
    ) -> Result<JobId, WorkflowError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(WorkflowError::InvalidSubmission("No title provided".to_string()));
        }
        if source_text.trim().is_empty() {
            return Err(WorkflowError::InvalidSubmission(
                "No document text provided".to_string(),
            ));
        }
        if document_id == 0 {
            return Err(WorkflowError::InvalidSubmission(
                "No document id provided".to_string(),
            ));
        }

        let now = Utc::now();
        let job = GenerationJob::new(JobId::generate(), document_id, title, source_text, now);
        self.save(&job)?;

        if let Err(e) = self.scheduler.schedule(Task::Advance(job.id.clone()), now) {
            error!(job_id = %job.id, error = %e, "failed to schedule first step");
            if let Err(cleanup) = self.jobs.delete_job(&job.id) {
                warn!(job_id = %job.id, error = %cleanup, "failed to remove unscheduled job");
            }
            return Err(e.into());
        }

        info!(job_id = %job.id, document_id, chars = source_text.len(), "job submitted");
        Ok(job.id)
    }

    /// Run exactly one step of a job.
    pub fn advance(&self, id: &JobId) -> Result<GenerationJob, WorkflowError> {
        self.advance_at(id, Utc::now())
    }

    pub fn advance_at(
        &self,
        id: &JobId,
        now: DateTime<Utc>,
    ) -> Result<GenerationJob, WorkflowError> {
        let lock = self.locks.get(id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let job = self.load(id)?;
        let limits = self.options.limits;
        let Some(event) = self.execute(&job, plan(&job, &limits)) else {
            debug!(job_id = %id, step = job.step.as_str(), "job is terminal, nothing to do");
            return Ok(job);
        };

        let (job, effects) = transition(job, event, &limits, now);
        self.persist(&job)?;

        match job.status {
            JobStatus::Error => error!(
                job_id = %job.id,
                error = job.error.as_deref().unwrap_or_default(),
                "job failed"
            ),
            JobStatus::Complete => info!(job_id = %job.id, "job complete"),
            JobStatus::Processing => info!(
                job_id = %job.id,
                step = job.step.as_str(),
                progress = job.progress,
                "step finished"
            ),
        }

        for effect in effects {
            self.apply(effect, now)?;
        }
        Ok(job)
    }

    /// Progress for a poller. Unknown and expired jobs are not found.
    pub fn poll(&self, id: &JobId) -> Result<ProgressReport, WorkflowError> {
        self.poll_at(id, Utc::now())
    }

    pub fn poll_at(&self, id: &JobId, now: DateTime<Utc>) -> Result<ProgressReport, WorkflowError> {
        let job = self.load(id)?;
        if job.is_expired(now) {
            return Err(WorkflowError::ProcessNotFound(id.to_string()));
        }
        Ok(ProgressReport::from_job(&job))
    }

    /// Delete a job. Returns false if it did not exist.
    pub fn purge(&self, id: &JobId) -> Result<bool, WorkflowError> {
        let lock = self.locks.get(id);
        let removed = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.jobs.delete_job(id)?
        };
        self.locks.forget(id);
        if removed {
            info!(job_id = %id, "job purged");
        }
        Ok(removed)
    }

    /// Delete every job whose grace window has passed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<JobId>, WorkflowError> {
        let mut purged = Vec::new();
        for id in self.jobs.list_jobs()? {
            if let Some(job) = self.jobs.load_job(&id)?
                && job.is_expired(now)
                && self.purge(&id)?
            {
                purged.push(id);
            }
        }
        Ok(purged)
    }

    /// Run one scheduled task.
    pub fn run_task(
        &self,
        task: Task,
        now: DateTime<Utc>,
    ) -> Result<Option<GenerationJob>, WorkflowError> {
        match task {
            Task::Advance(id) => self.advance_at(&id, now).map(Some),
            Task::Purge(id) => {
                match self.jobs.load_job(&id)? {
                    Some(job) if job.is_expired(now) => {
                        self.purge(&id)?;
                    }
                    Some(_) => debug!(job_id = %id, "purge skipped, job not expired"),
                    None => debug!(job_id = %id, "purge skipped, job already gone"),
                }
                Ok(None)
            }
        }
    }

    /// Run queued tasks until none are due. Returns the number of tasks run.
    pub fn drain(
        &self,
        queue: &TaskQueue,
        mut on_step: impl FnMut(&GenerationJob),
    ) -> Result<usize, WorkflowError> {
        let mut ran = 0;
        while let Some(task) = queue.pop_due(Utc::now()) {
            debug!(job_id = %task.job_id(), %task, "running task");
            if let Some(job) = self.run_task(task, Utc::now())? {
                on_step(&job);
            }
            ran += 1;
        }
        Ok(ran)
    }

    /// Advance every processing job by one step and purge expired ones.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, WorkflowError> {
        let mut report = TickReport::default();
        for id in self.jobs.list_jobs()? {
            let job = match self.jobs.load_job(&id) {
                Ok(Some(job)) => job,
                Ok(None) => continue,
                Err(e) => {
                    warn!(job_id = %id, error = %e, "skipping unreadable job");
                    report.failed.push((id, e.to_string()));
                    continue;
                }
            };

            if job.is_expired(now) {
                if self.purge(&id)? {
                    report.purged.push(id);
                }
                continue;
            }
            if job.is_terminal() {
                continue;
            }

            match self.advance_at(&id, now) {
                Ok(job) => report.advanced.push((id, job.step, job.progress)),
                Err(e) => report.failed.push((id, e.to_string())),
            }
        }
        Ok(report)
    }

    /// Full-scan recomputation of the global usage totals.
    pub fn recompute_totals(&self) -> Result<GlobalTotals, WorkflowError> {
        Ok(self.ledger.recompute_global_totals()?)
    }

    fn load(&self, id: &JobId) -> Result<GenerationJob, WorkflowError> {
        self.jobs
            .load_job(id)?
            .ok_or_else(|| WorkflowError::ProcessNotFound(id.to_string()))
    }

    fn execute(&self, job: &GenerationJob, plan: Plan) -> Option<Event> {
        match plan {
            Plan::Idle => None,
            Plan::Proceed => Some(Event::Proceed),
            Plan::Reject { message } => {
                warn!(job_id = %job.id, %message, "rejecting document");
                Some(Event::failed(message))
            }
            Plan::EditIntro { intro, sections } => {
                info!(job_id = %job.id, sections = sections.len(), "editing intro");
                let outcome = self.edit(job, "Edit intro", &intro, "Failed to generate introduction");
                Some(match outcome.result {
                    Ok(edit) => Event::IntroEdited {
                        edit,
                        sections,
                        usage: outcome.usage,
                        totals: outcome.totals,
                    },
                    Err(message) => Event::Failed {
                        message,
                        usage: outcome.usage,
                        totals: outcome.totals,
                    },
                })
            }
            Plan::EditSection { index, chunk } => {
                info!(job_id = %job.id, section = index + 1, "editing section");
                let label = format!("Edit section {}", index + 1);
                let outcome = self.edit(job, &label, &chunk, "Failed to generate section content");
                Some(match outcome.result {
                    Ok(edit) => Event::SectionEdited {
                        edit,
                        usage: outcome.usage,
                        totals: outcome.totals,
                    },
                    Err(message) => Event::Failed {
                        message,
                        usage: outcome.usage,
                        totals: outcome.totals,
                    },
                })
            }
        }
    }

    /// Edit one chunk and record the call's usage against the document.
    fn edit(
        &self,
        job: &GenerationJob,
        label: &str,
        chunk: &str,
        empty_message: &str,
    ) -> EditOutcome {
        let mut client = self.clients.client();
        let prompts = &self.options.prompts;
        let prompt = prompts.user_prompt(chunk);

        let result = if self.options.continuation {
            client.generate_continuous(&prompts.system, &prompt)
        } else {
            client.generate(&prompts.system, &prompt)
        };

        // Usage is billed whenever the provider answered, even with nothing.
        let answered = matches!(result, Ok(_) | Err(ProviderError::EmptyContent { .. }));
        let mut usage = None;
        let mut totals = None;
        if answered {
            let call = client.last_usage();
            match self.ledger.record_call(job.document_id, label, &call) {
                Ok(t) => totals = Some(t),
                Err(e) => {
                    return EditOutcome {
                        result: Err(format!("Failed to record usage: {}", e)),
                        usage: Some(call),
                        totals: None,
                    };
                }
            }
            usage = Some(call);
        }

        let result = result.map_err(|e| match e {
            ProviderError::EmptyContent { .. } => empty_message.to_string(),
            other => other.to_string(),
        });
        EditOutcome {
            result,
            usage,
            totals,
        }
    }

    fn save(&self, job: &GenerationJob) -> Result<(), WorkflowError> {
        match self.jobs.save_job(job) {
            Ok(bytes) => {
                debug!(job_id = %job.id, bytes, "job saved");
                Ok(())
            }
            Err(source) => {
                let bytes = serde_json::to_vec(job).map(|v| v.len()).unwrap_or(0);
                error!(job_id = %job.id, bytes, error = %source, "failed to save job");
                Err(WorkflowError::Persistence {
                    job_id: job.id.clone(),
                    bytes,
                    source,
                })
            }
        }
    }

    /// Save a job; if that fails, leave a failure record in its place so the
    /// job is not picked up again.
    fn persist(&self, job: &GenerationJob) -> Result<(), WorkflowError> {
        let result = self.save(job);
        if let Err(WorkflowError::Persistence { bytes, .. }) = &result {
            self.save_failure_record(job, *bytes);
        }
        result
    }

    /// The full record just failed to save, so the large text fields are
    /// dropped from the failure record.
    fn save_failure_record(&self, job: &GenerationJob, bytes: usize) {
        let now = Utc::now();
        let expires_at = now + self.options.limits.grace;
        let mut failed = job.clone();
        failed.status = JobStatus::Error;
        failed.error = Some(format!("Failed to save progress ({} bytes)", bytes));
        failed.source_text.clear();
        failed.content.clear();
        failed.sections.clear();
        failed.expires_at = Some(expires_at);
        failed.updated_at = now;

        if let Err(e) = self.jobs.save_job(&failed) {
            warn!(job_id = %job.id, error = %e, "failed to record save failure");
            return;
        }
        if let Err(e) = self
            .scheduler
            .schedule(Task::Purge(job.id.clone()), expires_at)
        {
            warn!(job_id = %job.id, error = %e, "failed to schedule purge of failed job");
        }
    }

    fn apply(&self, effect: Effect, now: DateTime<Utc>) -> Result<(), WorkflowError> {
        match effect {
            Effect::ScheduleNext(id) => self.scheduler.schedule(Task::Advance(id), now)?,
            Effect::SchedulePurge { id, at } => self.scheduler.schedule(Task::Purge(id), at)?,
        }
        Ok(())
    }
}
