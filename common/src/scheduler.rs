use std::ops::ControlFlow;

use crate::config::NodeSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobId {
    Telemetry,
    LinkStatus,
    SessionPump,
    InputPoll,
}

impl JobId {
    pub const ALL: [JobId; 4] = [
        JobId::Telemetry,
        JobId::LinkStatus,
        JobId::SessionPump,
        JobId::InputPoll,
    ];

    pub fn period_ms(self, settings: &NodeSettings) -> u64 {
        match self {
            Self::Telemetry => settings.telemetry_period_ms,
            Self::LinkStatus => settings.link_status_period_ms,
            Self::SessionPump => settings.session_pump_period_ms,
            Self::InputPoll => settings.input_poll_period_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodicJob {
    pub id: JobId,
    pub period_ms: u64,
    pub next_due_ms: u64,
    pub enabled: bool,
}

/// Fixed-period cooperative runner. Jobs run to completion in registration
/// order; nothing runs once the scheduler has been disarmed.
#[derive(Debug)]
pub struct Scheduler {
    jobs: Vec<PeriodicJob>,
    armed: bool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            armed: true,
        }
    }

    /// Registers a job in the disabled state. Re-registering replaces it.
    pub fn add(&mut self, id: JobId, period_ms: u64) {
        let job = PeriodicJob {
            id,
            period_ms: period_ms.max(1),
            next_due_ms: 0,
            enabled: false,
        };

        match self.jobs.iter_mut().find(|existing| existing.id == id) {
            Some(existing) => *existing = job,
            None => self.jobs.push(job),
        }
    }

    pub fn enable(&mut self, id: JobId, now_ms: u64) -> bool {
        if !self.armed {
            return false;
        }

        match self.jobs.iter_mut().find(|job| job.id == id) {
            Some(job) => {
                job.enabled = true;
                job.next_due_ms = now_ms;
                true
            }
            None => false,
        }
    }

    pub fn enable_all(&mut self, now_ms: u64) {
        if !self.armed {
            return;
        }

        for job in &mut self.jobs {
            job.enabled = true;
            job.next_due_ms = now_ms;
        }
    }

    /// Disarms the scheduler and disables every job. Takes effect before the
    /// next job is considered, including jobs that are already due.
    pub fn disable_all(&mut self) {
        self.armed = false;
        for job in &mut self.jobs {
            job.enabled = false;
        }
    }

    pub fn clear(&mut self) {
        self.jobs.clear();
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn jobs(&self) -> &[PeriodicJob] {
        &self.jobs
    }

    pub fn next_due_ms(&self) -> Option<u64> {
        if !self.armed {
            return None;
        }

        self.jobs
            .iter()
            .filter(|job| job.enabled)
            .map(|job| job.next_due_ms)
            .min()
    }

    /// Runs every due job once. A handler returning `Break` disarms the
    /// scheduler and ends the pass with its value.
    pub fn run_pending<B>(
        &mut self,
        now_ms: u64,
        mut handler: impl FnMut(JobId) -> ControlFlow<B>,
    ) -> (usize, Option<B>) {
        let mut executed = 0;

        for index in 0..self.jobs.len() {
            if !self.armed {
                break;
            }

            let job = &mut self.jobs[index];
            if !job.enabled || job.next_due_ms > now_ms {
                continue;
            }

            job.next_due_ms = job.next_due_ms.saturating_add(job.period_ms);
            if job.next_due_ms <= now_ms {
                job.next_due_ms = now_ms.saturating_add(job.period_ms);
            }

            let id = job.id;
            executed += 1;

            if let ControlFlow::Break(value) = handler(id) {
                self.disable_all();
                return (executed, Some(value));
            }
        }

        (executed, None)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn scheduler_with_defaults(now_ms: u64) -> Scheduler {
        let settings = NodeSettings::default();
        let mut scheduler = Scheduler::new();
        for id in JobId::ALL {
            scheduler.add(id, id.period_ms(&settings));
        }
        scheduler.enable_all(now_ms);
        scheduler
    }

    fn run(scheduler: &mut Scheduler, now_ms: u64) -> Vec<JobId> {
        let mut ran = Vec::new();
        scheduler.run_pending::<()>(now_ms, |id| {
            ran.push(id);
            ControlFlow::Continue(())
        });
        ran
    }

    #[test]
    fn jobs_run_immediately_then_on_their_period() {
        let mut scheduler = scheduler_with_defaults(1_000);

        assert_eq!(run(&mut scheduler, 1_000), JobId::ALL.to_vec());
        assert!(run(&mut scheduler, 1_049).is_empty());
        assert_eq!(run(&mut scheduler, 1_050), vec![JobId::InputPoll]);
        assert_eq!(
            run(&mut scheduler, 1_100),
            vec![JobId::SessionPump, JobId::InputPoll]
        );
        assert_eq!(scheduler.next_due_ms(), Some(1_150));
    }

    #[test]
    fn registered_jobs_stay_idle_until_enabled() {
        let mut scheduler = Scheduler::new();
        scheduler.add(JobId::Telemetry, 2_000);

        assert!(run(&mut scheduler, 10_000).is_empty());
        assert!(scheduler.enable(JobId::Telemetry, 10_000));
        assert_eq!(run(&mut scheduler, 10_000), vec![JobId::Telemetry]);
        assert!(!scheduler.enable(JobId::InputPoll, 10_000));
    }

    #[test]
    fn late_jobs_do_not_burst() {
        let mut scheduler = scheduler_with_defaults(0);
        run(&mut scheduler, 0);

        assert_eq!(run(&mut scheduler, 10_000), JobId::ALL.to_vec());
        assert_eq!(run(&mut scheduler, 10_001), Vec::<JobId>::new());
        assert_eq!(scheduler.next_due_ms(), Some(10_050));
    }

    #[test]
    fn break_stops_the_pass_and_disarms() {
        let mut scheduler = scheduler_with_defaults(0);
        let mut ran = Vec::new();

        let (executed, outcome) = scheduler.run_pending(0, |id| {
            ran.push(id);
            if id == JobId::LinkStatus {
                ControlFlow::Break("reset")
            } else {
                ControlFlow::Continue(())
            }
        });

        assert_eq!(executed, 2);
        assert_eq!(outcome, Some("reset"));
        assert_eq!(ran, vec![JobId::Telemetry, JobId::LinkStatus]);
        assert!(!scheduler.is_armed());
        assert!(scheduler.jobs().iter().all(|job| !job.enabled));
    }

    #[test]
    fn nothing_runs_after_disable_even_if_due() {
        let mut scheduler = scheduler_with_defaults(0);
        scheduler.disable_all();

        assert!(run(&mut scheduler, 0).is_empty());
        assert!(run(&mut scheduler, 60_000).is_empty());

        scheduler.enable_all(60_000);
        assert!(run(&mut scheduler, 60_000).is_empty());
        assert_eq!(scheduler.next_due_ms(), None);
    }
}
