//! In-memory run queue: jobs carry `(job_id, params_ts)` and transition
//! queued -> running -> {done, failed}; a newer job for the same target
//! coalesces older still-queued ones to `skipped`.

use std::collections::VecDeque;
use chrono::{DateTime, Duration, Utc};
use log::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: u64,
    pub params_ts: DateTime<Utc>,
    pub status: JobStatus,
}

/// A durable-FIFO stand-in: a coalescing queue of pending runs, one target
/// (the thing the config/params apply to) at a time.
#[derive(Default)]
pub struct JobQueue {
    jobs: VecDeque<Job>,
    next_id: u64,
}

impl JobQueue {
    pub fn new() -> JobQueue {
        JobQueue { jobs: VecDeque::new(), next_id: 1 }
    }

    /// Submits a new job, marking any still-queued job as `skipped` since it
    /// is now superseded by this newer one.
    pub fn submit(&mut self, params_ts: DateTime<Utc>) -> u64 {
        for job in self.jobs.iter_mut() {
            if job.status == JobStatus::Queued {
                job.status = JobStatus::Skipped;
                info!("job {} superseded by newer params_ts={}", job.job_id, params_ts);
            }
        }

        let job_id = self.next_id;
        self.next_id += 1;
        self.jobs.push_back(Job { job_id, params_ts, status: JobStatus::Queued });
        job_id
    }

    /// Submits a job for the periodic tick, debouncing it into the most
    /// recent still-queued submission when it arrives within `debounce` of
    /// that job's `params_ts` rather than spawning a fresh one — the
    /// coalesce-interval merge of rapid re-triggers into a single run.
    pub fn submit_debounced(&mut self, params_ts: DateTime<Utc>, debounce: Duration) -> u64 {
        if let Some(last) = self.jobs.back_mut() {
            if last.status == JobStatus::Queued && params_ts - last.params_ts <= debounce {
                info!("job {} debounced, merging newer params_ts={}", last.job_id, params_ts);
                last.params_ts = params_ts;
                return last.job_id;
            }
        }
        self.submit(params_ts)
    }

    /// Pops the oldest still-queued job and marks it running.
    pub fn pop_next(&mut self) -> Option<Job> {
        let pos = self.jobs.iter().position(|j| j.status == JobStatus::Queued)?;
        let job = &mut self.jobs[pos];
        job.status = JobStatus::Running;
        Some(job.clone())
    }

    pub fn mark_done(&mut self, job_id: u64) {
        self.set_status(job_id, JobStatus::Done);
    }

    pub fn mark_failed(&mut self, job_id: u64) {
        self.set_status(job_id, JobStatus::Failed);
    }

    fn set_status(&mut self, job_id: u64, status: JobStatus) {
        if let Some(job) = self.jobs.iter_mut().find(|j| j.job_id == job_id) {
            job.status = status;
        }
    }

    pub fn status(&self, job_id: u64) -> Option<JobStatus> {
        self.jobs.iter().find(|j| j.job_id == job_id).map(|j| j.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn newer_submission_coalesces_older_queued_jobs() {
        let mut q = JobQueue::new();
        let a = q.submit(ts(1));
        let b = q.submit(ts(2));
        assert_eq!(q.status(a), Some(JobStatus::Skipped));
        assert_eq!(q.status(b), Some(JobStatus::Queued));
    }

    #[test]
    fn running_job_is_not_skipped_by_a_later_submission() {
        let mut q = JobQueue::new();
        let a = q.submit(ts(1));
        let popped = q.pop_next().unwrap();
        assert_eq!(popped.job_id, a);
        let b = q.submit(ts(2));
        assert_eq!(q.status(a), Some(JobStatus::Running));
        assert_eq!(q.status(b), Some(JobStatus::Queued));
    }

    #[test]
    fn pop_next_returns_none_when_empty() {
        let mut q = JobQueue::new();
        assert!(q.pop_next().is_none());
    }

    #[test]
    fn debounced_submission_within_interval_merges_into_one_job() {
        let mut q = JobQueue::new();
        let a = q.submit_debounced(ts(1), Duration::seconds(2));
        let b = q.submit_debounced(ts(1) + Duration::seconds(1), Duration::seconds(2));
        assert_eq!(a, b);
        assert_eq!(q.status(a), Some(JobStatus::Queued));
    }

    #[test]
    fn debounced_submission_past_interval_starts_a_new_job() {
        let mut q = JobQueue::new();
        let a = q.submit_debounced(ts(1), Duration::seconds(2));
        let b = q.submit_debounced(ts(1) + Duration::seconds(10), Duration::seconds(2));
        assert_ne!(a, b);
        assert_eq!(q.status(a), Some(JobStatus::Skipped));
        assert_eq!(q.status(b), Some(JobStatus::Queued));
    }
}
