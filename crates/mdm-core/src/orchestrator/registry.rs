//! Registry of running jobs' abort flags.
//!
//! The worker registers a flag when it starts driving a job; cancel/pause
//! look the flag up and set it. The supervisor's control path polls it and
//! tears the child down.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::job_store::JobId;
use crate::supervisor::{AbortReason, CancelFlag};

#[derive(Default)]
pub struct JobControl {
    jobs: RwLock<HashMap<JobId, CancelFlag>>,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running job; returns the flag to hand to the supervisor.
    pub fn register(&self, job_id: &str) -> CancelFlag {
        let flag = CancelFlag::new();
        self.jobs
            .write()
            .unwrap()
            .insert(job_id.to_string(), flag.clone());
        flag
    }

    /// Unregister when the run settles, success or failure.
    pub fn unregister(&self, job_id: &str) {
        self.jobs.write().unwrap().remove(job_id);
    }

    /// Flag a running job for termination. Returns false when no worker in
    /// this process is driving the job.
    pub fn request_abort(&self, job_id: &str, reason: AbortReason) -> bool {
        match self.jobs.read().unwrap().get(job_id) {
            Some(flag) => {
                flag.request(reason);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_reaches_registered_flag() {
        let control = JobControl::new();
        let flag = control.register("j1");
        assert!(control.request_abort("j1", AbortReason::Cancel));
        assert_eq!(flag.requested(), Some(AbortReason::Cancel));
    }

    #[test]
    fn unknown_job_reports_false() {
        let control = JobControl::new();
        assert!(!control.request_abort("ghost", AbortReason::Pause));
    }

    #[test]
    fn unregister_clears_entry() {
        let control = JobControl::new();
        let _flag = control.register("j1");
        control.unregister("j1");
        assert!(!control.request_abort("j1", AbortReason::Cancel));
    }
}
