//! Per-job callback credentials.
//!
//! Each dispatched job gets a bearer token of the form
//! `{job_id}-{secret}` that the execution side must present on status
//! callbacks. The secret is generated at dispatch, is only valid while
//! the job is `running`, and is invalidated the moment the job reaches a
//! terminal state. Verification never mutates any state, so a rejected
//! callback cannot disturb a job record.

use miette::Diagnostic;
use parking_lot::Mutex;
use rand::Rng;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::types::{JobId, JobStatus};

/// UUID text form is fixed-width; the secret starts one hyphen later.
const JOB_ID_WIDTH: usize = 36;
const SECRET_WIDTH: usize = 32;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthError {
    #[error("malformed callback token")]
    #[diagnostic(
        code(taskweave::auth::malformed),
        help("Tokens have the form `{{job_id}}-{{secret}}` with a UUID job id.")
    )]
    Malformed,

    #[error("no credential issued for job {job_id}")]
    #[diagnostic(code(taskweave::auth::unknown_job))]
    UnknownJob { job_id: JobId },

    #[error("secret mismatch for job {job_id}")]
    #[diagnostic(code(taskweave::auth::secret_mismatch))]
    SecretMismatch { job_id: JobId },

    #[error("job {job_id} is {status}, callbacks only accepted while running")]
    #[diagnostic(code(taskweave::auth::not_running))]
    NotRunning { job_id: JobId, status: JobStatus },
}

/// Issues, revokes, and verifies per-job callback credentials.
#[derive(Default)]
pub struct CredentialRegistry {
    secrets: Mutex<FxHashMap<JobId, String>>,
}

impl CredentialRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh credential for a job being dispatched, replacing any
    /// previous one. Returns the full bearer token.
    pub fn issue(&self, job_id: JobId) -> String {
        let secret = format!("{:032x}", rand::rng().random::<u128>());
        let token = format!("{job_id}-{secret}");
        self.secrets.lock().insert(job_id, secret);
        token
    }

    /// Drop a job's credential; called at every terminal transition.
    pub fn revoke(&self, job_id: JobId) {
        self.secrets.lock().remove(&job_id);
    }

    /// Validate a bearer token against the issued secret and the job's
    /// current status.
    ///
    /// `status_of` reports the live status of the job named in the
    /// token. Returns the authenticated [`JobId`] so the caller can
    /// trust the association.
    pub fn verify<F>(&self, token: &str, status_of: F) -> Result<JobId, AuthError>
    where
        F: Fn(JobId) -> Option<JobStatus>,
    {
        // UUIDs contain hyphens themselves, so split at the fixed UUID
        // width rather than searching for a separator.
        if token.len() != JOB_ID_WIDTH + 1 + SECRET_WIDTH
            || token.as_bytes()[JOB_ID_WIDTH] != b'-'
        {
            return Err(AuthError::Malformed);
        }
        let job_id: JobId = token[..JOB_ID_WIDTH]
            .parse()
            .map_err(|_| AuthError::Malformed)?;
        let presented = &token[JOB_ID_WIDTH + 1..];

        let secrets = self.secrets.lock();
        let expected = secrets
            .get(&job_id)
            .ok_or(AuthError::UnknownJob { job_id })?;
        if expected != presented {
            return Err(AuthError::SecretMismatch { job_id });
        }
        drop(secrets);

        match status_of(job_id) {
            Some(JobStatus::Running) => Ok(job_id),
            Some(status) => Err(AuthError::NotRunning { job_id, status }),
            None => Err(AuthError::UnknownJob { job_id }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies_while_running() {
        let registry = CredentialRegistry::new();
        let job_id = JobId::new();
        let token = registry.issue(job_id);
        let verified = registry
            .verify(&token, |_| Some(JobStatus::Running))
            .unwrap();
        assert_eq!(verified, job_id);
    }

    #[test]
    fn rejects_after_revocation() {
        let registry = CredentialRegistry::new();
        let job_id = JobId::new();
        let token = registry.issue(job_id);
        registry.revoke(job_id);
        let err = registry
            .verify(&token, |_| Some(JobStatus::Running))
            .unwrap_err();
        assert!(matches!(err, AuthError::UnknownJob { .. }));
    }

    #[test]
    fn rejects_outside_running() {
        let registry = CredentialRegistry::new();
        let job_id = JobId::new();
        let token = registry.issue(job_id);
        for status in [JobStatus::Waiting, JobStatus::Successful, JobStatus::Failed] {
            let err = registry.verify(&token, |_| Some(status)).unwrap_err();
            assert!(matches!(err, AuthError::NotRunning { .. }));
        }
    }

    #[test]
    fn rejects_wrong_secret_and_malformed_tokens() {
        let registry = CredentialRegistry::new();
        let job_id = JobId::new();
        let token = registry.issue(job_id);

        let mut forged = token[..JOB_ID_WIDTH + 1].to_string();
        forged.push_str(&"0".repeat(SECRET_WIDTH));
        if forged != token {
            let err = registry
                .verify(&forged, |_| Some(JobStatus::Running))
                .unwrap_err();
            assert!(matches!(err, AuthError::SecretMismatch { .. }));
        }

        for bad in ["", "not-a-token", &token[..token.len() - 1]] {
            let err = registry
                .verify(bad, |_| Some(JobStatus::Running))
                .unwrap_err();
            assert!(matches!(err, AuthError::Malformed));
        }
    }

    #[test]
    fn reissue_replaces_previous_secret() {
        let registry = CredentialRegistry::new();
        let job_id = JobId::new();
        let first = registry.issue(job_id);
        let second = registry.issue(job_id);
        assert_ne!(first, second);
        assert!(registry
            .verify(&first, |_| Some(JobStatus::Running))
            .is_err());
        assert!(registry
            .verify(&second, |_| Some(JobStatus::Running))
            .is_ok());
    }
}
