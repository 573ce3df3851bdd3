//! Remote submission of a single draft
//!
//! Shared by queue drains and direct online writes: resolve local student
//! references, run remote-mode validation, then write the primary record
//! and any coupled guardian.

use std::sync::Arc;

use crate::cache::keys;
use crate::error::{Error, Result, ValidationError};
use crate::model::{Draft, NewPayment, PaymentDraft, RecordKind, StudentDraft, StudentRef};
use crate::queue::{QueueStatus, WriteQueue};
use crate::remote::RemoteBackend;
use crate::validation::{completion_status, rules, Validator};

/// Cache entries made stale by a successful write of `kind`
pub fn affected_cache_keys(kind: RecordKind) -> &'static [&'static str] {
    match kind {
        RecordKind::Enrollment => &[keys::ENROLLMENTS],
        RecordKind::Student => &[keys::STUDENTS],
        RecordKind::Payment => &[keys::PAYMENTS],
    }
}

/// Validates and writes drafts to the remote backend
#[derive(Clone)]
pub struct Submitter {
    remote: Arc<dyn RemoteBackend>,
    validator: Validator,
    queue: Arc<WriteQueue>,
}

impl Submitter {
    pub fn new(remote: Arc<dyn RemoteBackend>, queue: Arc<WriteQueue>) -> Self {
        Self {
            validator: Validator::new(Arc::clone(&remote)),
            remote,
            queue,
        }
    }

    /// Server id for a student reference. Local references must point at
    /// a queued student that has already synced.
    pub async fn resolve_student(&self, student: &StudentRef) -> Result<String> {
        match student {
            StudentRef::Remote(id) => Ok(id.clone()),
            StudentRef::Local(local_id) => match self.queue.get(local_id).await? {
                Some(item) if item.status == QueueStatus::Synced => item
                    .remote_id
                    .ok_or_else(|| Error::Store(format!("synced item {} has no remote id", local_id))),
                Some(_) => Err(ValidationError::StudentNotSynced(local_id.clone()).into()),
                None => Err(ValidationError::UnknownStudent(local_id.clone()).into()),
            },
        }
    }

    /// Validate against live remote state and write. Returns the remote id.
    pub async fn submit(&self, draft: &Draft) -> Result<String> {
        match draft {
            Draft::Enrollment(enrollment) => {
                self.validator.check_remote(draft, None).await?;
                self.remote.insert_enrollment(enrollment).await
            }
            Draft::Student(student) => {
                self.validator.check_remote(draft, None).await?;
                self.write_student(student).await
            }
            Draft::Payment(payment) => {
                let student_id = self.resolve_student(&payment.student).await?;
                self.validator.check_remote(draft, Some(&student_id)).await?;
                let body = self.build_payment(payment, student_id)?;
                self.remote.insert_payment(&body).await
            }
        }
    }

    fn build_payment(&self, payment: &PaymentDraft, student_id: String) -> Result<NewPayment> {
        Ok(NewPayment {
            student_id,
            amount: rules::payment_amount(payment)?,
            method: payment.method,
            reference: payment.reference.trim().to_string(),
            term: payment.term,
            academic_year: payment.academic_year,
            paid_on: payment.paid_on,
            status: completion_status(payment.recorded_by.role),
            recorded_by: payment.recorded_by.id.clone(),
            notes: payment.notes.clone(),
        })
    }

    /// Student plus guardian. A failed guardian insert deletes the student
    /// again so the pair is never left half written.
    async fn write_student(&self, student: &StudentDraft) -> Result<String> {
        let student_id = self.remote.insert_student(student).await?;

        let Some(guardian) = &student.guardian else {
            return Ok(student_id);
        };

        match self.remote.insert_guardian(&student_id, guardian).await {
            Ok(_) => Ok(student_id),
            Err(guardian_err) => match self.remote.delete_student(&student_id).await {
                Ok(()) => {
                    tracing::warn!(
                        "Guardian insert failed, rolled back student {}: {}",
                        student_id, guardian_err
                    );
                    Err(guardian_err)
                }
                Err(delete_err) => {
                    tracing::error!(
                        "Guardian insert failed and student {} could not be removed: {}",
                        student_id, delete_err
                    );
                    Err(Error::RemoteSubmission(format!(
                        "guardian not saved ({}); student {} remains without a guardian",
                        guardian_err, student_id
                    )))
                }
            },
        }
    }
}
