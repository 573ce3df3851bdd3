//! Business Rule Validator
//!
//! Local mode runs at enqueue time with no network: structure plus the
//! offline method restriction. Remote mode runs right before a write
//! reaches the backend and adds the checks that need live data:
//! reference uniqueness and term-sequence enforcement.

mod amount;
pub mod rules;
pub mod terms;

pub use amount::normalize_amount;
pub use rules::{check_offline, check_structure, completion_status};

use std::sync::Arc;

use crate::error::{Result, ValidationError};
use crate::model::{Draft, PaymentDraft, StudentRecord};
use crate::remote::RemoteBackend;

/// Paid totals within this margin of the fee count as settled
const PAID_EPSILON: f64 = 0.005;

/// Remote-mode validator
#[derive(Clone)]
pub struct Validator {
    remote: Arc<dyn RemoteBackend>,
}

impl Validator {
    pub fn new(remote: Arc<dyn RemoteBackend>) -> Self {
        Self { remote }
    }

    /// Local mode: no network access
    pub fn check_local(draft: &Draft) -> std::result::Result<(), ValidationError> {
        check_offline(draft)
    }

    /// Remote mode. `student_id` is the resolved server id for payments.
    ///
    /// Rule violations come back as `Error::Validation`; remote failures
    /// while checking come back as the remote error.
    pub async fn check_remote(&self, draft: &Draft, student_id: Option<&str>) -> Result<()> {
        check_structure(draft)?;

        if let Draft::Payment(payment) = draft {
            let student_id = student_id.ok_or(ValidationError::MissingField("student"))?;
            self.check_reference_unique(&payment.reference).await?;
            let student = self
                .remote
                .fetch_student(student_id)
                .await?
                .ok_or_else(|| ValidationError::UnknownStudent(student_id.to_string()))?;
            self.check_term_sequence(payment, &student).await?;
        }
        Ok(())
    }

    /// Reject a reference already used remotely (case-insensitive)
    pub async fn check_reference_unique(&self, reference: &str) -> Result<()> {
        if self.remote.reference_exists(reference).await? {
            return Err(ValidationError::DuplicateReference(reference.trim().to_string()).into());
        }
        Ok(())
    }

    /// Every earlier term of the payment's year must be fully paid
    pub async fn check_term_sequence(
        &self,
        payment: &PaymentDraft,
        student: &StudentRecord,
    ) -> Result<()> {
        let required = terms::prerequisite_terms(
            student.admission_term,
            student.admission_year,
            payment.term,
            payment.academic_year,
        )?;
        if required.is_empty() {
            return Ok(());
        }

        let schedule = self.remote.list_term_fees().await?;
        let grades = self.remote.list_grades().await?;

        for term in required {
            let fee = terms::fee_for(
                &student.grade,
                term,
                payment.academic_year,
                &schedule,
                &grades,
            )?;
            let paid = self
                .remote
                .paid_total(&student.id, term, payment.academic_year)
                .await?;

            tracing::debug!(
                "Student {} {} {}: paid {:.2} of {:.2}",
                student.id, term, payment.academic_year, paid, fee
            );

            if paid + PAID_EPSILON < fee {
                return Err(ValidationError::OutstandingTerm {
                    term: term.to_string(),
                    year: payment.academic_year,
                    paid,
                    fee,
                }
                .into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::model::{
        Actor, ActorRole, NewPayment, PaymentMethod, PaymentStatus, StudentRef, Term,
    };
    use crate::remote::MemoryBackend;
    use chrono::NaiveDate;

    async fn backend() -> Arc<MemoryBackend> {
        let remote = Arc::new(MemoryBackend::new());
        remote
            .seed_student(StudentRecord {
                id: "stu-1".into(),
                full_name: "Otieno Odhiambo".into(),
                admission_number: Some("ADM-104".into()),
                grade: "Grade 5".into(),
                admission_term: Term::One,
                admission_year: 2026,
            })
            .await;
        remote.seed_term_fee("Grade 5", Term::One, 2026, 1850.0).await;
        remote.seed_grade("Grade 5", Some(2000.0)).await;
        remote
    }

    fn payment(term: Term, reference: &str) -> PaymentDraft {
        PaymentDraft {
            student: StudentRef::Remote("stu-1".into()),
            amount: "KSh 1,850.00".into(),
            method: PaymentMethod::MobileMoney,
            reference: reference.into(),
            term,
            academic_year: 2026,
            paid_on: NaiveDate::from_ymd_opt(2026, 5, 4).unwrap(),
            recorded_by: Actor { id: "user-1".into(), role: ActorRole::Bursar },
            notes: None,
        }
    }

    fn recorded(term: Term, amount: f64, reference: &str) -> NewPayment {
        NewPayment {
            student_id: "stu-1".into(),
            amount,
            method: PaymentMethod::Cash,
            reference: reference.into(),
            term,
            academic_year: 2026,
            paid_on: NaiveDate::from_ymd_opt(2026, 1, 10).unwrap(),
            status: PaymentStatus::Completed,
            recorded_by: "user-1".into(),
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_term_two_rejected_while_term_one_outstanding() {
        let remote = backend().await;
        let validator = Validator::new(remote.clone());

        let draft = Draft::Payment(payment(Term::Two, "MP-200"));
        let err = validator.check_remote(&draft, Some("stu-1")).await.unwrap_err();
        match err {
            Error::Validation(ValidationError::OutstandingTerm { term, paid, fee, .. }) => {
                assert_eq!(term, "Term 1");
                assert_eq!(paid, 0.0);
                assert_eq!(fee, 1850.0);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_term_two_accepted_once_term_one_paid() {
        let remote = backend().await;
        remote.seed_payment(recorded(Term::One, 1000.0, "R-1")).await;
        remote.seed_payment(recorded(Term::One, 850.0, "R-2")).await;
        let validator = Validator::new(remote.clone());

        let draft = Draft::Payment(payment(Term::Two, "MP-201"));
        validator.check_remote(&draft, Some("stu-1")).await.unwrap();

        // Term 1 itself never has prerequisites for a Term 1 admission
        let draft = Draft::Payment(payment(Term::One, "MP-202"));
        validator.check_remote(&draft, Some("stu-1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_reference_case_insensitive() {
        let remote = backend().await;
        remote.seed_payment(recorded(Term::One, 1850.0, "mpesa-QX7")).await;
        let validator = Validator::new(remote.clone());

        let draft = Draft::Payment(payment(Term::One, "MPESA-qx7"));
        assert!(matches!(
            validator.check_remote(&draft, Some("stu-1")).await,
            Err(Error::Validation(ValidationError::DuplicateReference(_)))
        ));
    }

    #[tokio::test]
    async fn test_missing_fee_configuration_rejects() {
        let remote = Arc::new(MemoryBackend::new());
        remote
            .seed_student(StudentRecord {
                id: "stu-1".into(),
                full_name: "Otieno Odhiambo".into(),
                admission_number: None,
                grade: "Grade 7".into(),
                admission_term: Term::One,
                admission_year: 2026,
            })
            .await;
        let validator = Validator::new(remote.clone());

        let draft = Draft::Payment(payment(Term::Three, "MP-300"));
        assert!(matches!(
            validator.check_remote(&draft, Some("stu-1")).await,
            Err(Error::Validation(ValidationError::MissingFee { .. }))
        ));
    }

    #[tokio::test]
    async fn test_unknown_student_and_network_errors() {
        let remote = backend().await;
        let validator = Validator::new(remote.clone());
        let draft = Draft::Payment(payment(Term::One, "MP-400"));

        assert!(matches!(
            validator.check_remote(&draft, Some("stu-404")).await,
            Err(Error::Validation(ValidationError::UnknownStudent(_)))
        ));

        remote.set_offline(true).await;
        let err = validator.check_remote(&draft, Some("stu-1")).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
