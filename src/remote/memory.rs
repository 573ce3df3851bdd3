//! In-process backend
//!
//! Keeps every table in memory. Reachability can be toggled, inserts can
//! be slowed down and guardian inserts can be made to fail, which lets the
//! sync path be exercised without a server.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::RemoteBackend;
use crate::audit::AuditRecord;
use crate::error::{Error, Result};
use crate::model::{
    EnrollmentDraft, GradeRecord, GuardianDraft, NewPayment, PaymentRecord, PaymentUpdate,
    StudentDraft, StudentRecord, Term, TermFee,
};

#[derive(Default)]
struct MemoryState {
    next_id: u64,
    enrollments: Vec<(String, EnrollmentDraft)>,
    students: Vec<StudentRecord>,
    guardians: Vec<(String, String, GuardianDraft)>,
    payments: Vec<PaymentRecord>,
    grades: Vec<GradeRecord>,
    term_fees: Vec<TermFee>,
    audit: Vec<AuditRecord>,
    offline: bool,
    insert_latency: Duration,
    fail_guardian_inserts: bool,
    fail_audit_inserts: bool,
}

impl MemoryState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.offline {
            return Err(Error::Network("remote unreachable".into()));
        }
        Ok(())
    }
}

/// Remote backend held entirely in memory
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with a network error (or stop doing so)
    pub async fn set_offline(&self, offline: bool) {
        self.state.lock().await.offline = offline;
    }

    /// Delay every record insert by `latency`
    pub async fn set_insert_latency(&self, latency: Duration) {
        self.state.lock().await.insert_latency = latency;
    }

    async fn insert_delay(&self) {
        let latency = self.state.lock().await.insert_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// Make guardian inserts fail with a server rejection
    pub async fn fail_guardian_inserts(&self, fail: bool) {
        self.state.lock().await.fail_guardian_inserts = fail;
    }

    /// Make audit inserts fail with a server rejection
    pub async fn fail_audit_inserts(&self, fail: bool) {
        self.state.lock().await.fail_audit_inserts = fail;
    }

    pub async fn seed_student(&self, student: StudentRecord) {
        self.state.lock().await.students.push(student);
    }

    pub async fn seed_grade(&self, name: &str, flat_fee: Option<f64>) {
        self.state.lock().await.grades.push(GradeRecord {
            name: name.to_string(),
            flat_fee,
        });
    }

    pub async fn seed_term_fee(&self, grade: &str, term: Term, academic_year: i32, amount: f64) {
        self.state.lock().await.term_fees.push(TermFee {
            grade: grade.to_string(),
            term,
            academic_year,
            amount,
        });
    }

    pub async fn seed_payment(&self, payment: NewPayment) -> String {
        let mut state = self.state.lock().await;
        let id = state.next_id("pay");
        state.payments.push(PaymentRecord { id: id.clone(), payment });
        id
    }

    pub async fn enrollments(&self) -> Vec<EnrollmentDraft> {
        let state = self.state.lock().await;
        state.enrollments.iter().map(|(_, e)| e.clone()).collect()
    }

    pub async fn students(&self) -> Vec<StudentRecord> {
        self.state.lock().await.students.clone()
    }

    pub async fn payments(&self) -> Vec<PaymentRecord> {
        self.state.lock().await.payments.clone()
    }

    /// Guardians linked to a student
    pub async fn guardians_of(&self, student_id: &str) -> Vec<GuardianDraft> {
        let state = self.state.lock().await;
        state
            .guardians
            .iter()
            .filter(|(_, sid, _)| sid == student_id)
            .map(|(_, _, g)| g.clone())
            .collect()
    }

    pub async fn audit_records(&self) -> Vec<AuditRecord> {
        self.state.lock().await.audit.clone()
    }
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
    async fn insert_enrollment(&self, draft: &EnrollmentDraft) -> Result<String> {
        self.insert_delay().await;
        let mut state = self.state.lock().await;
        state.check_reachable()?;
        let id = state.next_id("enr");
        state.enrollments.push((id.clone(), draft.clone()));
        Ok(id)
    }

    async fn insert_student(&self, draft: &StudentDraft) -> Result<String> {
        self.insert_delay().await;
        let mut state = self.state.lock().await;
        state.check_reachable()?;
        let id = state.next_id("stu");
        state.students.push(StudentRecord {
            id: id.clone(),
            full_name: draft.full_name.clone(),
            admission_number: draft.admission_number.clone(),
            grade: draft.grade.clone(),
            admission_term: draft.admission_term,
            admission_year: draft.admission_year,
        });
        Ok(id)
    }

    async fn delete_student(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_reachable()?;
        state.students.retain(|s| s.id != id);
        Ok(())
    }

    async fn insert_guardian(&self, student_id: &str, guardian: &GuardianDraft) -> Result<String> {
        let mut state = self.state.lock().await;
        state.check_reachable()?;
        if state.fail_guardian_inserts {
            return Err(Error::RemoteRejected {
                status: 400,
                message: "guardian phone violates check constraint".into(),
            });
        }
        let id = state.next_id("gdn");
        state
            .guardians
            .push((id.clone(), student_id.to_string(), guardian.clone()));
        Ok(id)
    }

    async fn insert_payment(&self, payment: &NewPayment) -> Result<String> {
        self.insert_delay().await;
        let mut state = self.state.lock().await;
        state.check_reachable()?;
        let id = state.next_id("pay");
        state.payments.push(PaymentRecord {
            id: id.clone(),
            payment: payment.clone(),
        });
        Ok(id)
    }

    async fn fetch_payment(&self, id: &str) -> Result<Option<PaymentRecord>> {
        let state = self.state.lock().await;
        state.check_reachable()?;
        Ok(state.payments.iter().find(|p| p.id == id).cloned())
    }

    async fn update_payment(&self, id: &str, update: &PaymentUpdate) -> Result<PaymentRecord> {
        let mut state = self.state.lock().await;
        state.check_reachable()?;
        let record = state
            .payments
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| Error::RemoteNotFound {
                table: "payments".into(),
                id: id.to_string(),
            })?;
        update.apply(&mut record.payment);
        Ok(record.clone())
    }

    async fn fetch_student(&self, id: &str) -> Result<Option<StudentRecord>> {
        let state = self.state.lock().await;
        state.check_reachable()?;
        Ok(state.students.iter().find(|s| s.id == id).cloned())
    }

    async fn list_students(&self) -> Result<Vec<StudentRecord>> {
        let state = self.state.lock().await;
        state.check_reachable()?;
        Ok(state.students.clone())
    }

    async fn list_grades(&self) -> Result<Vec<GradeRecord>> {
        let state = self.state.lock().await;
        state.check_reachable()?;
        Ok(state.grades.clone())
    }

    async fn list_term_fees(&self) -> Result<Vec<TermFee>> {
        let state = self.state.lock().await;
        state.check_reachable()?;
        Ok(state.term_fees.clone())
    }

    async fn reference_exists(&self, reference: &str) -> Result<bool> {
        let state = self.state.lock().await;
        state.check_reachable()?;
        let wanted = reference.trim().to_lowercase();
        Ok(state
            .payments
            .iter()
            .any(|p| p.payment.reference.trim().to_lowercase() == wanted))
    }

    async fn paid_total(&self, student_id: &str, term: Term, academic_year: i32) -> Result<f64> {
        let state = self.state.lock().await;
        state.check_reachable()?;
        Ok(state
            .payments
            .iter()
            .filter(|p| {
                p.payment.student_id == student_id
                    && p.payment.term == term
                    && p.payment.academic_year == academic_year
            })
            .map(|p| p.payment.amount)
            .sum())
    }

    async fn insert_audit(&self, record: &AuditRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_reachable()?;
        if state.fail_audit_inserts {
            return Err(Error::RemoteRejected {
                status: 403,
                message: "audit_logs insert denied".into(),
            });
        }
        state.audit.push(record.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.state.lock().await.check_reachable()
    }
}
