//! Structural and role rules that need no remote state

use super::amount::normalize_amount;
use crate::error::ValidationError;
use crate::model::{
    Actor, ActorRole, Draft, EnrollmentDraft, PaymentDraft, PaymentStatus, PaymentUpdate,
    StudentDraft, StudentRef,
};

fn require(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    Ok(())
}

/// Required fields and well-formed values, valid in any connectivity state
pub fn check_structure(draft: &Draft) -> Result<(), ValidationError> {
    match draft {
        Draft::Enrollment(e) => check_enrollment(e),
        Draft::Student(s) => check_student(s),
        Draft::Payment(p) => check_payment(p).map(|_| ()),
    }
}

/// Structural checks plus the offline-only restrictions
pub fn check_offline(draft: &Draft) -> Result<(), ValidationError> {
    check_structure(draft)?;
    if let Draft::Payment(p) = draft {
        if !p.method.valid_offline() {
            return Err(ValidationError::MethodRequiresOnline(p.method.to_string()));
        }
    }
    Ok(())
}

fn check_enrollment(draft: &EnrollmentDraft) -> Result<(), ValidationError> {
    require(&draft.applicant_name, "applicant name")?;
    require(&draft.grade, "grade")?;
    Ok(())
}

fn check_student(draft: &StudentDraft) -> Result<(), ValidationError> {
    require(&draft.full_name, "full name")?;
    require(&draft.grade, "grade")?;
    if let Some(guardian) = &draft.guardian {
        require(&guardian.name, "guardian name")?;
    }
    Ok(())
}

/// Returns the normalized amount
fn check_payment(draft: &PaymentDraft) -> Result<f64, ValidationError> {
    match &draft.student {
        StudentRef::Remote(id) | StudentRef::Local(id) => require(id, "student")?,
    }
    require(&draft.reference, "payment reference")?;
    require(&draft.recorded_by.id, "recorded by")?;
    normalize_amount(&draft.amount)
}

/// Normalized amount of a payment draft
pub fn payment_amount(draft: &PaymentDraft) -> Result<f64, ValidationError> {
    check_payment(draft)
}

/// Completion status a payment gets from the role that recorded it
pub fn completion_status(role: ActorRole) -> PaymentStatus {
    if role.is_privileged() {
        PaymentStatus::Completed
    } else {
        PaymentStatus::PendingApproval
    }
}

/// Rules for editing an already recorded payment
pub fn check_payment_edit(
    actor: &Actor,
    update: &PaymentUpdate,
    reason: &str,
) -> Result<(), ValidationError> {
    if !actor.role.is_privileged() {
        return Err(ValidationError::NotPermitted(actor.role.to_string()));
    }
    if reason.trim().is_empty() {
        return Err(ValidationError::MissingReason);
    }
    if let Some(amount) = update.amount {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(ValidationError::InvalidAmount(amount.to_string()));
        }
    }
    if let Some(reference) = &update.reference {
        require(reference, "payment reference")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PaymentMethod, Term};
    use chrono::NaiveDate;

    fn payment(method: PaymentMethod, amount: &str, reference: &str) -> Draft {
        Draft::Payment(PaymentDraft {
            student: StudentRef::Remote("stu-1".into()),
            amount: amount.into(),
            method,
            reference: reference.into(),
            term: Term::One,
            academic_year: 2026,
            paid_on: NaiveDate::from_ymd_opt(2026, 1, 12).unwrap(),
            recorded_by: Actor { id: "user-1".into(), role: ActorRole::Clerk },
            notes: None,
        })
    }

    #[test]
    fn test_offline_rejects_mobile_money() {
        let draft = payment(PaymentMethod::MobileMoney, "1000", "QX12");
        assert!(check_structure(&draft).is_ok());
        assert!(matches!(
            check_offline(&draft),
            Err(ValidationError::MethodRequiresOnline(_))
        ));
        assert!(check_offline(&payment(PaymentMethod::Cash, "1000", "R-1")).is_ok());
    }

    #[test]
    fn test_payment_structure() {
        assert_eq!(
            check_offline(&payment(PaymentMethod::Cash, "1000", "  ")),
            Err(ValidationError::MissingField("payment reference"))
        );
        assert!(matches!(
            check_offline(&payment(PaymentMethod::Cash, "-5", "R-1")),
            Err(ValidationError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_student_guardian_name_required() {
        let draft = Draft::Student(StudentDraft {
            full_name: "Wanjiru Kamau".into(),
            admission_number: None,
            date_of_birth: None,
            grade: "Grade 1".into(),
            admission_term: Term::One,
            admission_year: 2026,
            guardian: Some(crate::model::GuardianDraft {
                name: "".into(),
                phone: Some("0700000000".into()),
                relationship: None,
            }),
        });
        assert_eq!(
            check_offline(&draft),
            Err(ValidationError::MissingField("guardian name"))
        );
    }

    #[test]
    fn test_completion_status_by_role() {
        assert_eq!(completion_status(ActorRole::Admin), PaymentStatus::Completed);
        assert_eq!(completion_status(ActorRole::Bursar), PaymentStatus::Completed);
        assert_eq!(completion_status(ActorRole::Clerk), PaymentStatus::PendingApproval);
        assert_eq!(completion_status(ActorRole::Teacher), PaymentStatus::PendingApproval);
    }

    #[test]
    fn test_edit_rules() {
        let bursar = Actor { id: "u".into(), role: ActorRole::Bursar };
        let clerk = Actor { id: "u".into(), role: ActorRole::Clerk };
        let update = PaymentUpdate { amount: Some(500.0), ..Default::default() };

        assert!(check_payment_edit(&bursar, &update, "wrong amount").is_ok());
        assert_eq!(
            check_payment_edit(&bursar, &update, " "),
            Err(ValidationError::MissingReason)
        );
        assert!(matches!(
            check_payment_edit(&clerk, &update, "wrong amount"),
            Err(ValidationError::NotPermitted(_))
        ));
    }
}
