//! Ordering helpers for job collections.

use crate::job::Job;
use crate::types::JobId;

/// Strict FIFO ordering for dispatch: ascending creation time, with
/// job id as a stable tie-break for jobs created in the same instant.
pub fn fifo_order<'a, I>(jobs: I) -> Vec<JobId>
where
    I: IntoIterator<Item = &'a Job>,
{
    let mut jobs: Vec<&Job> = jobs.into_iter().collect();
    jobs.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
    jobs.into_iter().map(|job| job.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobKind, LaunchType};
    use chrono::Utc;

    #[test]
    fn orders_by_creation_time() {
        let base = Utc::now();
        let late = Job::new(JobKind::Standalone, LaunchType::Manual)
            .with_created(base + chrono::Duration::seconds(10));
        let early = Job::new(JobKind::Standalone, LaunchType::Manual).with_created(base);
        let middle = Job::new(JobKind::Standalone, LaunchType::Manual)
            .with_created(base + chrono::Duration::seconds(5));

        let ordered = fifo_order([&late, &early, &middle]);
        assert_eq!(ordered, vec![early.id, middle.id, late.id]);
    }

    #[test]
    fn equal_timestamps_break_ties_by_id() {
        let base = Utc::now();
        let a = Job::new(JobKind::Standalone, LaunchType::Manual).with_created(base);
        let b = Job::new(JobKind::Standalone, LaunchType::Manual).with_created(base);
        let ordered = fifo_order([&a, &b]);
        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(ordered, expected);
    }
}
