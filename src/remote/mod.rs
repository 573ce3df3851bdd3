//! Remote Backend
//!
//! Row-oriented API the device synchronizes against. The HTTP backend
//! talks to a PostgREST-style service; the memory backend keeps
//! everything in process for tests and demos.

mod http;
mod memory;

pub use http::HttpBackend;
pub use memory::MemoryBackend;

use async_trait::async_trait;

use crate::audit::AuditRecord;
use crate::error::Result;
use crate::model::{
    EnrollmentDraft, GradeRecord, GuardianDraft, NewPayment, PaymentRecord, PaymentUpdate,
    StudentDraft, StudentRecord, Term, TermFee,
};

/// Operations the sync engine needs from the remote system
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Insert an enrollment application, returning its id
    async fn insert_enrollment(&self, draft: &EnrollmentDraft) -> Result<String>;

    /// Insert a student (without guardian), returning its id
    async fn insert_student(&self, draft: &StudentDraft) -> Result<String>;

    /// Delete a student; used to undo a half-written student/guardian pair
    async fn delete_student(&self, id: &str) -> Result<()>;

    /// Insert a guardian linked to a student, returning its id
    async fn insert_guardian(&self, student_id: &str, guardian: &GuardianDraft) -> Result<String>;

    /// Insert a payment, returning its id
    async fn insert_payment(&self, payment: &NewPayment) -> Result<String>;

    /// Fetch one payment
    async fn fetch_payment(&self, id: &str) -> Result<Option<PaymentRecord>>;

    /// Apply an update to a payment and return the stored result
    async fn update_payment(&self, id: &str, update: &PaymentUpdate) -> Result<PaymentRecord>;

    /// Fetch one student
    async fn fetch_student(&self, id: &str) -> Result<Option<StudentRecord>>;

    /// Full student roster
    async fn list_students(&self) -> Result<Vec<StudentRecord>>;

    /// Grade catalog
    async fn list_grades(&self) -> Result<Vec<GradeRecord>>;

    /// Per-term fee schedule
    async fn list_term_fees(&self) -> Result<Vec<TermFee>>;

    /// Whether a payment reference is already used (case-insensitive)
    async fn reference_exists(&self, reference: &str) -> Result<bool>;

    /// Sum of recorded payments for a student in one term
    async fn paid_total(&self, student_id: &str, term: Term, academic_year: i32) -> Result<f64>;

    /// Append an audit record
    async fn insert_audit(&self, record: &AuditRecord) -> Result<()>;

    /// Cheap round trip used as a reachability probe
    async fn ping(&self) -> Result<()>;
}
