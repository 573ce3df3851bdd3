//! Domain Records
//!
//! Draft payloads that travel through the write queue, and the rows the
//! remote backend hands back.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::id::LOCAL_PREFIX;

/// Role of the signed-in actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Admin,
    Bursar,
    Teacher,
    #[default]
    Clerk,
}

impl ActorRole {
    /// Roles allowed to complete payments and edit recorded ones
    pub fn is_privileged(&self) -> bool {
        matches!(self, ActorRole::Admin | ActorRole::Bursar)
    }
}

impl std::fmt::Display for ActorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorRole::Admin => write!(f, "admin"),
            ActorRole::Bursar => write!(f, "bursar"),
            ActorRole::Teacher => write!(f, "teacher"),
            ActorRole::Clerk => write!(f, "clerk"),
        }
    }
}

/// Authenticated actor performing a change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: ActorRole,
}

/// School term within an academic year
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Term {
    #[serde(rename = "Term 1")]
    One,
    #[serde(rename = "Term 2")]
    Two,
    #[serde(rename = "Term 3")]
    Three,
}

impl Term {
    pub const ALL: [Term; 3] = [Term::One, Term::Two, Term::Three];

    pub fn number(&self) -> u8 {
        match self {
            Term::One => 1,
            Term::Two => 2,
            Term::Three => 3,
        }
    }

    /// Parse `Term 2`, `term2`, `T2` or `2`
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
        let lower = s.trim().to_ascii_lowercase();
        let prefix_ok = lower
            .trim_end_matches(|c: char| c.is_ascii_digit() || c.is_whitespace())
            .trim_end_matches(|c: char| c.is_whitespace());
        if !matches!(prefix_ok, "" | "t" | "term") {
            return Err(ValidationError::UnknownTerm(s.to_string()));
        }
        match digits.as_str() {
            "1" => Ok(Term::One),
            "2" => Ok(Term::Two),
            "3" => Ok(Term::Three),
            _ => Err(ValidationError::UnknownTerm(s.to_string())),
        }
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Term {}", self.number())
    }
}

/// How a fee payment was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    Cheque,
    /// Needs a live confirmation from the mobile money provider
    MobileMoney,
}

impl PaymentMethod {
    /// Whether the method can be recorded without connectivity
    pub fn valid_offline(&self) -> bool {
        !matches!(self, PaymentMethod::MobileMoney)
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentMethod::Cash => write!(f, "cash"),
            PaymentMethod::BankTransfer => write!(f, "bank_transfer"),
            PaymentMethod::Cheque => write!(f, "cheque"),
            PaymentMethod::MobileMoney => write!(f, "mobile_money"),
        }
    }
}

/// Completion state assigned to a payment when it reaches the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Completed,
    PendingApproval,
}

/// Reference to a student that may only exist locally so far
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "id", rename_all = "snake_case")]
pub enum StudentRef {
    /// Server-assigned id
    Remote(String),
    /// Local id of a queued student draft
    Local(String),
}

impl StudentRef {
    /// Build from a raw id, treating `local-` ids as queued drafts
    pub fn from_id(id: &str) -> Self {
        if id.starts_with(LOCAL_PREFIX) {
            StudentRef::Local(id.to_string())
        } else {
            StudentRef::Remote(id.to_string())
        }
    }
}

/// Admission application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentDraft {
    pub applicant_name: String,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    pub grade: String,
    pub term: Term,
    pub academic_year: i32,
    #[serde(default)]
    pub guardian_name: Option<String>,
    #[serde(default)]
    pub guardian_phone: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Guardian written together with a student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardianDraft {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub relationship: Option<String>,
}

/// New student record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentDraft {
    pub full_name: String,
    #[serde(default)]
    pub admission_number: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    pub grade: String,
    pub admission_term: Term,
    pub admission_year: i32,
    #[serde(default)]
    pub guardian: Option<GuardianDraft>,
}

/// Fee payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentDraft {
    pub student: StudentRef,
    /// Amount as typed, e.g. `KSh 1,850.00`
    pub amount: String,
    pub method: PaymentMethod,
    pub reference: String,
    pub term: Term,
    pub academic_year: i32,
    pub paid_on: NaiveDate,
    /// Stamped with the session actor when the payment is recorded
    #[serde(default)]
    pub recorded_by: Actor,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Any queued write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Draft {
    Enrollment(EnrollmentDraft),
    Student(StudentDraft),
    Payment(PaymentDraft),
}

impl Draft {
    pub fn kind(&self) -> RecordKind {
        match self {
            Draft::Enrollment(_) => RecordKind::Enrollment,
            Draft::Student(_) => RecordKind::Student,
            Draft::Payment(_) => RecordKind::Payment,
        }
    }
}

/// Record kinds held by the write queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Enrollment,
    Student,
    Payment,
}

impl RecordKind {
    /// Drain order: later kinds may reference ids produced by earlier ones
    pub const DRAIN_ORDER: [RecordKind; 3] =
        [RecordKind::Enrollment, RecordKind::Student, RecordKind::Payment];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Enrollment => "enrollment",
            RecordKind::Student => "student",
            RecordKind::Payment => "payment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "enrollment" => Some(RecordKind::Enrollment),
            "student" => Some(RecordKind::Student),
            "payment" => Some(RecordKind::Payment),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============ Remote rows ============

/// Student as stored remotely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub id: String,
    pub full_name: String,
    #[serde(default)]
    pub admission_number: Option<String>,
    pub grade: String,
    pub admission_term: Term,
    pub admission_year: i32,
}

/// Grade catalog entry with its flat fallback fee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeRecord {
    pub name: String,
    #[serde(default)]
    pub flat_fee: Option<f64>,
}

/// Scheduled fee for one (grade, term, year)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermFee {
    pub grade: String,
    pub term: Term,
    pub academic_year: i32,
    pub amount: f64,
}

/// Payment body sent to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPayment {
    pub student_id: String,
    pub amount: f64,
    pub method: PaymentMethod,
    pub reference: String,
    pub term: Term,
    pub academic_year: i32,
    pub paid_on: NaiveDate,
    pub status: PaymentStatus,
    pub recorded_by: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Payment as stored remotely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: String,
    #[serde(flatten)]
    pub payment: NewPayment,
}

/// Editable payment fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<PaymentMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl PaymentUpdate {
    /// Apply the changes to a stored payment
    pub fn apply(&self, payment: &mut NewPayment) {
        if let Some(amount) = self.amount {
            payment.amount = amount;
        }
        if let Some(method) = self.method {
            payment.method = method;
        }
        if let Some(reference) = &self.reference {
            payment.reference = reference.clone();
        }
        if let Some(notes) = &self.notes {
            payment.notes = Some(notes.clone());
        }
    }
}
