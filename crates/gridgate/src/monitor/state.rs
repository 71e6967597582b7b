use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::define_wrapped_type;
use crate::gridengine::JobStatus;
use crate::monitor::JobDescriptor;
use crate::{JobId, Map};

pub const DEFAULT_HISTORY_SIZE: usize = 100;

/// Jobs tracked until they reach a terminal status, plus a short history of finished ones.
pub struct JobMonitor {
    tracked: Map<JobId, JobDescriptor>,
    /// Submissions that were admitted but whose `qsub` has not returned yet.
    pending_submissions: usize,
    history: VecDeque<JobDescriptor>,
    history_size: usize,
}

define_wrapped_type!(JobMonitorRef, JobMonitor, pub);

impl Default for JobMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

impl JobMonitor {
    pub fn new(history_size: usize) -> Self {
        Self {
            tracked: Default::default(),
            pending_submissions: 0,
            history: VecDeque::with_capacity(history_size),
            history_size,
        }
    }

    pub fn register(&mut self, descriptor: JobDescriptor) {
        log::debug!(
            "Tracking job {} ({}) of {}",
            descriptor.job_id,
            descriptor.job_name,
            descriptor.user
        );
        self.tracked.insert(descriptor.job_id.clone(), descriptor);
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// Tracked jobs together with submissions in flight.
    pub fn active_count(&self) -> usize {
        self.tracked.len() + self.pending_submissions
    }

    pub fn begin_submission(&mut self) {
        self.pending_submissions += 1;
    }

    pub fn end_submission(&mut self) {
        self.pending_submissions = self.pending_submissions.saturating_sub(1);
    }

    pub fn get_tracked(&self, job_id: &str) -> Option<&JobDescriptor> {
        self.tracked.get(job_id)
    }

    pub fn get_tracked_mut(&mut self, job_id: &str) -> Option<&mut JobDescriptor> {
        self.tracked.get_mut(job_id)
    }

    /// Looks up a tracked job or a recently finished one.
    pub fn find_job(&self, job_id: &str) -> Option<&JobDescriptor> {
        self.tracked
            .get(job_id)
            .or_else(|| self.history.iter().rev().find(|job| job.job_id == job_id))
    }

    /// Tracked jobs sorted by their id.
    pub fn tracked_jobs(&self) -> Vec<JobDescriptor> {
        let mut jobs: Vec<JobDescriptor> = self.tracked.values().cloned().collect();
        jobs.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        jobs
    }

    pub fn history(&self) -> impl Iterator<Item = &JobDescriptor> {
        self.history.iter()
    }

    /// Ids of tracked jobs grouped by their owning session.
    pub fn jobs_by_session(&self) -> Map<String, Vec<JobId>> {
        let mut groups: Map<String, Vec<JobId>> = Map::new();
        for job in self.tracked.values() {
            groups
                .entry(job.session_name.clone())
                .or_default()
                .push(job.job_id.clone());
        }
        groups
    }

    /// Stops tracking a job with a terminal status and moves it into the history.
    pub fn finish(
        &mut self,
        job_id: &str,
        status: JobStatus,
        now: DateTime<Utc>,
    ) -> Option<JobDescriptor> {
        debug_assert!(status.is_terminal());
        let mut job = self.tracked.remove(job_id)?;
        job.set_status(status, now);
        job.finish_tasks(status, now);

        if self.history_size > 0 {
            if self.history.len() == self.history_size {
                self.history.pop_front();
            }
            self.history.push_back(job.clone());
        }
        Some(job)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::JobMonitor;
    use crate::gridengine::JobStatus;
    use crate::monitor::JobDescriptor;

    fn job(id: &str, session: &str) -> JobDescriptor {
        JobDescriptor::new(
            id.to_string(),
            "job".to_string(),
            None,
            "user".to_string(),
            session.to_string(),
            Utc::now(),
        )
    }

    #[test]
    fn active_count_includes_pending() {
        let mut monitor = JobMonitor::default();
        monitor.register(job("1", "a"));
        monitor.begin_submission();
        assert_eq!(monitor.tracked_count(), 1);
        assert_eq!(monitor.active_count(), 2);
        monitor.end_submission();
        monitor.end_submission();
        assert_eq!(monitor.active_count(), 1);
    }

    #[test]
    fn finish_moves_job_to_history() {
        let mut monitor = JobMonitor::default();
        monitor.register(job("1", "a"));
        let finished = monitor
            .finish("1", JobStatus::Completed, Utc::now())
            .unwrap();
        assert_eq!(finished.job_status, JobStatus::Completed);
        assert!(monitor.is_empty());
        assert_eq!(
            monitor.find_job("1").unwrap().job_status,
            JobStatus::Completed
        );
        assert!(monitor.finish("1", JobStatus::Terminated, Utc::now()).is_none());
    }

    #[test]
    fn history_is_bounded() {
        let mut monitor = JobMonitor::new(2);
        for id in ["1", "2", "3"] {
            monitor.register(job(id, "a"));
            monitor.finish(id, JobStatus::Completed, Utc::now());
        }
        let ids: Vec<_> = monitor.history().map(|j| j.job_id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3"]);
        assert!(monitor.find_job("1").is_none());
    }

    #[test]
    fn group_by_session() {
        let mut monitor = JobMonitor::default();
        monitor.register(job("1", "a"));
        monitor.register(job("2", "b"));
        monitor.register(job("3", "a"));
        let mut groups = monitor.jobs_by_session();
        let mut a = groups.remove("a").unwrap();
        a.sort();
        assert_eq!(a, vec!["1", "3"]);
        assert_eq!(groups.remove("b").unwrap(), vec!["2"]);
    }
}
