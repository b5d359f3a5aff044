//! NATS stream and subject names. Kept in one place so producers and
//! consumers can never drift apart.

/// Durable stream holding job-start messages.
pub const JOBS_STREAM: &str = "SCRIBA_JOBS";

/// Subject the request API publishes job-start messages to.
pub const JOB_START_SUBJECT: &str = "scriba.jobs.start";

/// Stream holding quarantined messages.
pub const DLQ_STREAM: &str = "SCRIBA_DLQ";

/// Subject poisoned job-start messages are copied to.
pub const DLQ_SUBJECT: &str = "scriba.jobs.dlq";

/// Prefix for per-job status fan-out subjects.
pub const STATUS_SUBJECT_PREFIX: &str = "scriba.jobs.status";

/// Fan-out subject for one job's status updates.
pub fn status_subject(job_id: &str) -> String {
    format!("{}.{}", STATUS_SUBJECT_PREFIX, job_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_subject_is_per_job() {
        assert_eq!(
            status_subject("11111111-1111-1111-1111-111111111111"),
            "scriba.jobs.status.11111111-1111-1111-1111-111111111111"
        );
    }
}
