//! Record Service
//!
//! Entry point for user actions. While online a write goes straight to the
//! remote backend; offline, or when the backend cannot be reached, it is
//! queued for the next drain.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audit::{AuditAction, AuditEmitter};
use crate::cache::{keys, CacheStore};
use crate::connectivity::ConnectivityMonitor;
use crate::error::{Error, Result};
use crate::model::{
    Actor, Draft, EnrollmentDraft, PaymentDraft, PaymentRecord, PaymentUpdate, RecordKind,
    StudentDraft, StudentRef,
};
use crate::queue::{QueueItem, WriteQueue};
use crate::remote::RemoteBackend;
use crate::sync::{affected_cache_keys, Submitter};
use crate::validation::{check_offline, check_structure, rules, Validator};

/// Where a write ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WriteOutcome {
    /// Written to the remote backend
    Synced { remote_id: String },
    /// Held in the local queue
    Queued { local_id: String },
}

fn table_for(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Enrollment => "enrollments",
        RecordKind::Student => "students",
        RecordKind::Payment => "payments",
    }
}

/// Online-first writes with queue fallback
pub struct RecordService {
    queue: Arc<WriteQueue>,
    cache: Arc<CacheStore>,
    connectivity: Arc<ConnectivityMonitor>,
    remote: Arc<dyn RemoteBackend>,
    submitter: Submitter,
    validator: Validator,
    audit: AuditEmitter,
    session: Actor,
}

impl RecordService {
    pub fn new(
        queue: Arc<WriteQueue>,
        cache: Arc<CacheStore>,
        connectivity: Arc<ConnectivityMonitor>,
        remote: Arc<dyn RemoteBackend>,
        audit: AuditEmitter,
        session: Actor,
    ) -> Self {
        Self {
            submitter: Submitter::new(Arc::clone(&remote), Arc::clone(&queue)),
            validator: Validator::new(Arc::clone(&remote)),
            queue,
            cache,
            connectivity,
            remote,
            audit,
            session,
        }
    }

    /// Signed-in actor
    pub fn session(&self) -> &Actor {
        &self.session
    }

    pub async fn enroll(&self, draft: EnrollmentDraft) -> Result<WriteOutcome> {
        self.submit(Draft::Enrollment(draft)).await
    }

    pub async fn add_student(&self, draft: StudentDraft) -> Result<WriteOutcome> {
        self.submit(Draft::Student(draft)).await
    }

    pub async fn record_payment(&self, draft: PaymentDraft) -> Result<WriteOutcome> {
        self.submit(Draft::Payment(draft)).await
    }

    /// Write a draft now if possible, otherwise queue it.
    ///
    /// Validation failures are returned to the caller and nothing is
    /// written or queued.
    pub async fn submit(&self, mut draft: Draft) -> Result<WriteOutcome> {
        if let Draft::Payment(payment) = &mut draft {
            payment.recorded_by = self.session.clone();
        }
        check_structure(&draft)?;

        if self.connectivity.is_online() && !self.follows_queued_student(&draft).await? {
            match self.submitter.submit(&draft).await {
                Ok(remote_id) => {
                    self.after_direct_write(&draft, &remote_id).await;
                    return Ok(WriteOutcome::Synced { remote_id });
                }
                Err(e) if e.is_retryable() => {
                    // Methods that need a live confirmation cannot wait in the queue
                    if check_offline(&draft).is_err() {
                        return Err(e);
                    }
                    tracing::warn!("Direct {} write failed, queueing instead: {}", draft.kind(), e);
                }
                Err(e) => return Err(e),
            }
        }

        check_offline(&draft)?;
        let kind = draft.kind();
        let local_id = self.queue.enqueue(draft).await?;
        tracing::info!("Queued {} {} for sync", kind, local_id);
        Ok(WriteOutcome::Queued { local_id })
    }

    /// A payment for a student still waiting in the queue has to go
    /// through the queue too, behind that student.
    async fn follows_queued_student(&self, draft: &Draft) -> Result<bool> {
        let Draft::Payment(PaymentDraft { student: StudentRef::Local(local_id), .. }) = draft else {
            return Ok(false);
        };
        Ok(matches!(self.queue.get(local_id).await?, Some(item) if item.is_pending()))
    }

    async fn after_direct_write(&self, draft: &Draft, remote_id: &str) {
        for key in affected_cache_keys(draft.kind()) {
            if let Err(e) = self.cache.invalidate(key).await {
                tracing::warn!("Failed to invalidate cache '{}': {}", key, e);
            }
        }

        self.audit
            .record(
                AuditAction::Create,
                table_for(draft.kind()),
                remote_id,
                None,
                serde_json::to_value(draft).ok(),
                &self.session.id,
                None,
            )
            .await;
    }

    /// Change a recorded payment. Privileged roles only, online only, with
    /// a mandatory reason that lands in the audit trail.
    pub async fn edit_payment(
        &self,
        payment_id: &str,
        update: PaymentUpdate,
        reason: &str,
        actor: &Actor,
    ) -> Result<PaymentRecord> {
        rules::check_payment_edit(actor, &update, reason)?;
        if !self.connectivity.is_online() {
            return Err(Error::Network("payment edits need a connection".into()));
        }

        let before = self
            .remote
            .fetch_payment(payment_id)
            .await?
            .ok_or_else(|| Error::RemoteNotFound {
                table: "payments".into(),
                id: payment_id.to_string(),
            })?;

        if let Some(reference) = &update.reference {
            if !reference.trim().eq_ignore_ascii_case(before.payment.reference.trim()) {
                self.validator.check_reference_unique(reference).await?;
            }
        }

        let after = self.remote.update_payment(payment_id, &update).await?;
        if let Err(e) = self.cache.invalidate(keys::PAYMENTS).await {
            tracing::warn!("Failed to invalidate cache '{}': {}", keys::PAYMENTS, e);
        }

        self.audit
            .record(
                AuditAction::Update,
                "payments",
                payment_id,
                serde_json::to_value(&before).ok(),
                serde_json::to_value(&after).ok(),
                &actor.id,
                Some(reason.trim()),
            )
            .await;

        tracing::info!("Payment {} edited by {}", payment_id, actor.id);
        Ok(after)
    }

    /// Put a failed item back in the queue after re-running local checks
    pub async fn resubmit(&self, local_id: &str) -> Result<String> {
        let item = self
            .queue
            .get(local_id)
            .await?
            .ok_or_else(|| Error::QueueItemNotFound(local_id.to_string()))?;
        check_offline(&item.draft)?;
        self.queue.requeue(local_id).await
    }

    /// Drop an item from the local queue
    pub async fn discard(&self, local_id: &str) -> Result<QueueItem> {
        self.queue.remove(local_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::RemoteAuditSink;
    use crate::error::ValidationError;
    use crate::model::{ActorRole, NewPayment, PaymentMethod, PaymentStatus, StudentRecord, Term};
    use crate::queue::QueueStatus;
    use crate::remote::MemoryBackend;
    use chrono::NaiveDate;
    use std::time::Duration;

    struct Harness {
        service: RecordService,
        queue: Arc<WriteQueue>,
        remote: Arc<MemoryBackend>,
        connectivity: Arc<ConnectivityMonitor>,
    }

    async fn harness(online: bool) -> Harness {
        let queue = Arc::new(WriteQueue::in_memory("front-desk").unwrap());
        let cache = Arc::new(CacheStore::in_memory(Duration::from_secs(3600)).unwrap());
        let remote = Arc::new(MemoryBackend::new());
        let connectivity = Arc::new(ConnectivityMonitor::new(online));
        remote
            .seed_student(StudentRecord {
                id: "stu-9".into(),
                full_name: "Chebet Rotich".into(),
                admission_number: None,
                grade: "Grade 6".into(),
                admission_term: Term::One,
                admission_year: 2026,
            })
            .await;

        let audit = AuditEmitter::new(Arc::new(RemoteAuditSink::new(remote.clone())));
        let service = RecordService::new(
            queue.clone(),
            cache,
            connectivity.clone(),
            remote.clone(),
            audit,
            bursar(),
        );
        Harness {
            service,
            queue,
            remote,
            connectivity,
        }
    }

    fn bursar() -> Actor {
        Actor { id: "bursar-1".into(), role: ActorRole::Bursar }
    }

    fn payment(method: PaymentMethod, reference: &str) -> PaymentDraft {
        PaymentDraft {
            student: StudentRef::Remote("stu-9".into()),
            amount: "KSh 2,000".into(),
            method,
            reference: reference.into(),
            term: Term::One,
            academic_year: 2026,
            paid_on: NaiveDate::from_ymd_opt(2026, 1, 20).unwrap(),
            recorded_by: bursar(),
            notes: None,
        }
    }

    async fn seeded_payment(remote: &MemoryBackend) -> String {
        remote
            .seed_payment(NewPayment {
                student_id: "stu-9".into(),
                amount: 2000.0,
                method: PaymentMethod::Cash,
                reference: "RCPT-11".into(),
                term: Term::One,
                academic_year: 2026,
                paid_on: NaiveDate::from_ymd_opt(2026, 1, 20).unwrap(),
                status: PaymentStatus::Completed,
                recorded_by: "bursar-1".into(),
                notes: None,
            })
            .await
    }

    #[tokio::test]
    async fn test_online_payment_written_and_audited() {
        let h = harness(true).await;
        let outcome = h
            .service
            .record_payment(payment(PaymentMethod::MobileMoney, "MP-1"))
            .await
            .unwrap();

        let WriteOutcome::Synced { remote_id } = outcome else {
            panic!("expected a direct write");
        };
        assert_eq!(h.queue.counts().await.unwrap().pending, 0);

        let audit = h.remote.audit_records().await;
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, AuditAction::Create);
        assert_eq!(audit[0].record_id, remote_id);
        assert_eq!(audit[0].actor_id, "bursar-1");
    }

    #[tokio::test]
    async fn test_offline_payment_queued() {
        let h = harness(false).await;
        let outcome = h
            .service
            .record_payment(payment(PaymentMethod::Cash, "CASH-1"))
            .await
            .unwrap();

        let WriteOutcome::Queued { local_id } = outcome else {
            panic!("expected a queued write");
        };
        let item = h.queue.get(&local_id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert!(h.remote.payments().await.is_empty());
    }

    #[tokio::test]
    async fn test_offline_mobile_money_rejected_not_queued() {
        let h = harness(false).await;
        let err = h
            .service
            .record_payment(payment(PaymentMethod::MobileMoney, "MP-2"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::MethodRequiresOnline(_))
        ));
        assert_eq!(h.queue.counts().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_unreachable_backend_falls_back_to_queue() {
        let h = harness(true).await;
        h.remote.set_offline(true).await;

        let outcome = h
            .service
            .record_payment(payment(PaymentMethod::Cheque, "CHQ-3"))
            .await
            .unwrap();
        assert!(matches!(outcome, WriteOutcome::Queued { .. }));

        // mobile money is not queued even then
        let err = h
            .service
            .record_payment(payment(PaymentMethod::MobileMoney, "MP-3"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(h.queue.counts().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_invalid_amount_blocks_write() {
        let h = harness(true).await;
        let mut draft = payment(PaymentMethod::Cash, "CASH-4");
        draft.amount = "-5".into();
        assert!(h.service.record_payment(draft).await.unwrap_err().is_validation());
        assert!(h.remote.payments().await.is_empty());
    }

    #[tokio::test]
    async fn test_edit_payment_requires_role_and_reason() {
        let h = harness(true).await;
        let id = seeded_payment(&h.remote).await;
        let update = PaymentUpdate { amount: Some(1800.0), ..Default::default() };

        let clerk = Actor { id: "clerk-1".into(), role: ActorRole::Clerk };
        assert!(matches!(
            h.service.edit_payment(&id, update.clone(), "typo", &clerk).await,
            Err(Error::Validation(ValidationError::NotPermitted(_)))
        ));
        assert!(matches!(
            h.service.edit_payment(&id, update.clone(), "  ", &bursar()).await,
            Err(Error::Validation(ValidationError::MissingReason))
        ));

        h.connectivity.report(false);
        assert!(h.service.edit_payment(&id, update, "typo", &bursar()).await.is_err());
        assert!(h.remote.audit_records().await.is_empty());
    }

    #[tokio::test]
    async fn test_edit_payment_audits_before_and_after() {
        let h = harness(true).await;
        let id = seeded_payment(&h.remote).await;
        let update = PaymentUpdate { amount: Some(1800.0), ..Default::default() };

        let edited = h
            .service
            .edit_payment(&id, update, "receipt misread", &bursar())
            .await
            .unwrap();
        assert_eq!(edited.payment.amount, 1800.0);

        let audit = h.remote.audit_records().await;
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, AuditAction::Update);
        assert_eq!(audit[0].before.as_ref().unwrap()["amount"], 2000.0);
        let after = audit[0].after.as_ref().unwrap();
        assert_eq!(after["amount"], 1800.0);
        assert_eq!(after["reason"], "receipt misread");
    }

    #[tokio::test]
    async fn test_edit_survives_audit_failure() {
        let h = harness(true).await;
        let id = seeded_payment(&h.remote).await;
        h.remote.fail_audit_inserts(true).await;

        let update = PaymentUpdate { notes: Some("late fee waived".into()), ..Default::default() };
        let edited = h.service.edit_payment(&id, update, "board approval", &bursar()).await.unwrap();
        assert_eq!(edited.payment.notes.as_deref(), Some("late fee waived"));
        assert!(h.remote.audit_records().await.is_empty());
    }

    #[tokio::test]
    async fn test_payment_recorded_as_session_actor() {
        let h = harness(true).await;
        let mut draft = payment(PaymentMethod::Cash, "CASH-6");
        draft.recorded_by = Actor { id: "someone-else".into(), role: ActorRole::Admin };
        h.service.record_payment(draft).await.unwrap();

        let payments = h.remote.payments().await;
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].payment.recorded_by, "bursar-1");
        assert_eq!(h.remote.audit_records().await[0].actor_id, "bursar-1");
    }

    #[tokio::test]
    async fn test_payment_for_queued_student_queued_after_reconnect() {
        let h = harness(false).await;
        let WriteOutcome::Queued { local_id: student_id } = h
            .service
            .add_student(StudentDraft {
                full_name: "Otieno Ouma".into(),
                admission_number: None,
                date_of_birth: None,
                grade: "Grade 6".into(),
                admission_term: Term::One,
                admission_year: 2026,
                guardian: None,
            })
            .await
            .unwrap()
        else {
            panic!("expected a queued write");
        };

        // back online before any drain has run
        h.connectivity.report(true);
        let mut draft = payment(PaymentMethod::Cash, "CASH-7");
        draft.student = StudentRef::Local(student_id);
        let outcome = h.service.record_payment(draft).await.unwrap();

        assert!(matches!(outcome, WriteOutcome::Queued { .. }));
        assert_eq!(h.queue.counts().await.unwrap().pending, 2);
        assert!(h.remote.payments().await.is_empty());
    }

    #[tokio::test]
    async fn test_resubmit_and_discard() {
        let h = harness(false).await;
        let WriteOutcome::Queued { local_id } = h
            .service
            .record_payment(payment(PaymentMethod::Cash, "CASH-5"))
            .await
            .unwrap()
        else {
            panic!("expected a queued write");
        };

        // only failed items can be resubmitted
        assert!(h.service.resubmit(&local_id).await.is_err());

        h.queue.mark_failed(&local_id, "remote rejected").await.unwrap();
        let new_id = h.service.resubmit(&local_id).await.unwrap();
        assert_ne!(new_id, local_id);
        assert!(h.queue.get(&local_id).await.unwrap().is_none());

        let removed = h.service.discard(&new_id).await.unwrap();
        assert_eq!(removed.status, QueueStatus::Pending);
        assert_eq!(h.queue.counts().await.unwrap().pending, 0);
    }
}
