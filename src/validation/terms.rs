//! Term-sequence rules
//!
//! A payment for term N of a year is only accepted once every earlier term
//! of that year the student was enrolled for has been paid in full.

use crate::error::ValidationError;
use crate::model::{GradeRecord, Term, TermFee};

/// Terms of `year` that must be fully paid before `term` can be paid.
///
/// Starts at the admission term when the student was admitted that year,
/// at Term 1 otherwise; stops before `term`.
pub fn prerequisite_terms(
    admission_term: Term,
    admission_year: i32,
    term: Term,
    year: i32,
) -> Result<Vec<Term>, ValidationError> {
    if year < admission_year || (year == admission_year && term < admission_term) {
        return Err(ValidationError::BeforeAdmission {
            term: term.to_string(),
            year,
            admission_term: admission_term.to_string(),
            admission_year,
        });
    }

    let first = if year == admission_year {
        admission_term
    } else {
        Term::One
    };

    Ok(Term::ALL
        .into_iter()
        .filter(|t| *t >= first && *t < term)
        .collect())
}

/// Fee owed for a term: the scheduled fee, else the grade's flat fee.
/// Missing configuration is an error, never zero.
pub fn fee_for(
    grade: &str,
    term: Term,
    year: i32,
    schedule: &[TermFee],
    grades: &[GradeRecord],
) -> Result<f64, ValidationError> {
    let scheduled = schedule.iter().find(|f| {
        f.term == term && f.academic_year == year && f.grade.eq_ignore_ascii_case(grade)
    });
    if let Some(fee) = scheduled {
        return Ok(fee.amount);
    }

    grades
        .iter()
        .find(|g| g.name.eq_ignore_ascii_case(grade))
        .and_then(|g| g.flat_fee)
        .ok_or_else(|| ValidationError::MissingFee {
            grade: grade.to_string(),
            term: term.to_string(),
            year,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fee(grade: &str, term: Term, year: i32, amount: f64) -> TermFee {
        TermFee {
            grade: grade.into(),
            term,
            academic_year: year,
            amount,
        }
    }

    #[test]
    fn test_prerequisites_same_year() {
        assert!(prerequisite_terms(Term::One, 2026, Term::One, 2026).unwrap().is_empty());
        assert_eq!(
            prerequisite_terms(Term::One, 2026, Term::Three, 2026).unwrap(),
            vec![Term::One, Term::Two]
        );
        assert_eq!(
            prerequisite_terms(Term::Two, 2026, Term::Three, 2026).unwrap(),
            vec![Term::Two]
        );
    }

    #[test]
    fn test_prerequisites_later_year_start_at_term_one() {
        assert_eq!(
            prerequisite_terms(Term::Three, 2025, Term::Two, 2026).unwrap(),
            vec![Term::One]
        );
    }

    #[test]
    fn test_before_admission_rejected() {
        assert!(matches!(
            prerequisite_terms(Term::Two, 2026, Term::One, 2026),
            Err(ValidationError::BeforeAdmission { .. })
        ));
        assert!(matches!(
            prerequisite_terms(Term::One, 2026, Term::Three, 2025),
            Err(ValidationError::BeforeAdmission { .. })
        ));
    }

    #[test]
    fn test_fee_lookup_falls_back_to_flat_fee() {
        let schedule = vec![fee("Grade 3", Term::One, 2026, 9000.0)];
        let grades = vec![
            GradeRecord { name: "Grade 3".into(), flat_fee: Some(7500.0) },
            GradeRecord { name: "Grade 4".into(), flat_fee: None },
        ];

        assert_eq!(fee_for("grade 3", Term::One, 2026, &schedule, &grades).unwrap(), 9000.0);
        assert_eq!(fee_for("Grade 3", Term::Two, 2026, &schedule, &grades).unwrap(), 7500.0);
        assert!(matches!(
            fee_for("Grade 4", Term::One, 2026, &schedule, &grades),
            Err(ValidationError::MissingFee { .. })
        ));
        assert!(fee_for("Grade 9", Term::One, 2026, &schedule, &grades).is_err());
    }
}
