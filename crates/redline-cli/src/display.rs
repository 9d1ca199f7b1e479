//! Terminal progress display for `redline run`.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use redline_core::job::GenerationJob;
use redline_workflow::progress_message;

/// Percentage bar for the job plus a spinner carrying its running cost.
pub struct EditProgress {
    multi: MultiProgress,
    step_bar: ProgressBar,
    cost_bar: ProgressBar,
}

impl Default for EditProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl EditProgress {
    pub fn new() -> Self {
        let multi = MultiProgress::new();

        let step_bar = multi.add(ProgressBar::new(100));
        step_bar.set_style(
            ProgressStyle::default_bar()
                .template("  {prefix:.bold} [{bar:30.cyan/blue}] {pos}% {msg}")
                .expect("valid template")
                .progress_chars("##-"),
        );
        step_bar.set_prefix("intro");
        step_bar.set_message(progress_message(redline_core::job::Step::Intro, 0));

        let cost_bar = multi.add(ProgressBar::new_spinner());
        cost_bar.set_style(
            ProgressStyle::default_spinner()
                .template("  {spinner:.green} {msg}")
                .expect("valid template"),
        );

        Self {
            multi,
            step_bar,
            cost_bar,
        }
    }

    /// Reflect a job after one of its steps ran.
    pub fn update(&self, job: &GenerationJob) {
        self.step_bar.set_prefix(job.step.as_str());
        self.step_bar.set_position(u64::from(job.progress));
        self.step_bar
            .set_message(progress_message(job.step, job.current_section));

        if let Some(totals) = &job.document_totals {
            self.cost_bar.set_message(format!(
                "${:.4} spent ({} prompt / {} completion tokens)",
                totals.cost, totals.prompt_tokens, totals.completion_tokens
            ));
            self.cost_bar.tick();
        }
    }

    pub fn finish(&self) {
        self.step_bar.finish_and_clear();
        self.cost_bar.finish_and_clear();
    }

    /// Suspend the bars for clean eprintln output.
    pub fn suspend<F: FnOnce()>(&self, f: F) {
        self.multi.suspend(f);
    }
}
