//! HTTP Backend
//!
//! PostgREST-style REST client: one resource per table under `/rest/v1`,
//! filters as `column=op.value` query parameters, `apikey` plus bearer
//! token on every request.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::RemoteBackend;
use crate::audit::AuditRecord;
use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::model::{
    EnrollmentDraft, GradeRecord, GuardianDraft, NewPayment, PaymentRecord, PaymentUpdate,
    StudentDraft, StudentRecord, Term, TermFee,
};

#[derive(Deserialize)]
struct IdRow {
    id: serde_json::Value,
}

impl IdRow {
    fn into_string(self) -> String {
        match self.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct AmountRow {
    amount: f64,
}

/// REST client for the remote backend
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    token: String,
}

impl HttpBackend {
    /// Create a client from the remote configuration
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            token: config
                .access_token
                .clone()
                .unwrap_or_else(|| config.api_key.clone()),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, self.table_url(table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.token)
    }

    async fn insert_row<T: Serialize + ?Sized>(&self, table: &str, body: &T) -> Result<String> {
        let response = self
            .request(Method::POST, table)
            .header("Prefer", "return=representation")
            .query(&[("select", "id")])
            .json(body)
            .send()
            .await?;

        let rows: Vec<IdRow> = check(response).await?.json().await?;
        rows.into_iter()
            .next()
            .map(IdRow::into_string)
            .ok_or_else(|| Error::RemoteSubmission(format!("insert into {} returned no row", table)))
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let response = self.request(Method::GET, table).query(query).send().await?;
        Ok(check(response).await?.json().await?)
    }
}

/// Turn non-2xx responses into errors carrying the server's message
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    if status.is_server_error() || status.as_u16() == 408 {
        return Err(Error::Network(format!("{}: {}", status, message)));
    }
    Err(Error::RemoteRejected {
        status: status.as_u16(),
        message,
    })
}

/// Escape LIKE wildcards so `ilike` performs a case-insensitive equality match
fn like_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\' | '*') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    async fn insert_enrollment(&self, draft: &EnrollmentDraft) -> Result<String> {
        self.insert_row("enrollments", draft).await
    }

    async fn insert_student(&self, draft: &StudentDraft) -> Result<String> {
        let body = json!({
            "full_name": draft.full_name,
            "admission_number": draft.admission_number,
            "date_of_birth": draft.date_of_birth,
            "grade": draft.grade,
            "admission_term": draft.admission_term,
            "admission_year": draft.admission_year,
        });
        self.insert_row("students", &body).await
    }

    async fn delete_student(&self, id: &str) -> Result<()> {
        let response = self
            .request(Method::DELETE, "students")
            .query(&[("id", format!("eq.{}", id))])
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn insert_guardian(&self, student_id: &str, guardian: &GuardianDraft) -> Result<String> {
        let body = json!({
            "student_id": student_id,
            "name": guardian.name,
            "phone": guardian.phone,
            "relationship": guardian.relationship,
        });
        self.insert_row("guardians", &body).await
    }

    async fn insert_payment(&self, payment: &NewPayment) -> Result<String> {
        self.insert_row("payments", payment).await
    }

    async fn fetch_payment(&self, id: &str) -> Result<Option<PaymentRecord>> {
        let rows: Vec<PaymentRecord> = self
            .select("payments", &[("id", format!("eq.{}", id)), ("select", "*".into())])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn update_payment(&self, id: &str, update: &PaymentUpdate) -> Result<PaymentRecord> {
        let response = self
            .request(Method::PATCH, "payments")
            .header("Prefer", "return=representation")
            .query(&[("id", format!("eq.{}", id))])
            .json(update)
            .send()
            .await?;

        let rows: Vec<PaymentRecord> = check(response).await?.json().await?;
        rows.into_iter().next().ok_or_else(|| Error::RemoteNotFound {
            table: "payments".into(),
            id: id.to_string(),
        })
    }

    async fn fetch_student(&self, id: &str) -> Result<Option<StudentRecord>> {
        let rows: Vec<StudentRecord> = self
            .select("students", &[("id", format!("eq.{}", id)), ("select", "*".into())])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn list_students(&self) -> Result<Vec<StudentRecord>> {
        self.select("students", &[("select", "*".into()), ("order", "full_name".into())])
            .await
    }

    async fn list_grades(&self) -> Result<Vec<GradeRecord>> {
        self.select("grades", &[("select", "name,flat_fee".into()), ("order", "name".into())])
            .await
    }

    async fn list_term_fees(&self) -> Result<Vec<TermFee>> {
        self.select(
            "term_fees",
            &[("select", "grade,term,academic_year,amount".into())],
        )
        .await
    }

    async fn reference_exists(&self, reference: &str) -> Result<bool> {
        let rows: Vec<IdRow> = self
            .select(
                "payments",
                &[
                    ("select", "id".into()),
                    ("reference", format!("ilike.{}", like_literal(reference.trim()))),
                    ("limit", "1".into()),
                ],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn paid_total(&self, student_id: &str, term: Term, academic_year: i32) -> Result<f64> {
        let rows: Vec<AmountRow> = self
            .select(
                "payments",
                &[
                    ("select", "amount".into()),
                    ("student_id", format!("eq.{}", student_id)),
                    ("term", format!("eq.{}", term)),
                    ("academic_year", format!("eq.{}", academic_year)),
                ],
            )
            .await?;
        Ok(rows.iter().map(|r| r.amount).sum())
    }

    async fn insert_audit(&self, record: &AuditRecord) -> Result<()> {
        let response = self
            .request(Method::POST, "audit_logs")
            .header("Prefer", "return=minimal")
            .json(record)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let response = self
            .request(Method::GET, "grades")
            .query(&[("select", "name"), ("limit", "1")])
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_literal_escapes_wildcards() {
        assert_eq!(like_literal("MPESA-001"), "MPESA-001");
        assert_eq!(like_literal("50%_off"), "50\\%\\_off");
        assert_eq!(like_literal("a*b"), "a\\*b");
    }

    #[test]
    fn test_table_url_trims_slash() {
        let backend = HttpBackend::new(&RemoteConfig {
            url: "https://school.example.org/".into(),
            api_key: "anon".into(),
            access_token: None,
            timeout_secs: 5,
        })
        .unwrap();
        assert_eq!(
            backend.table_url("payments"),
            "https://school.example.org/rest/v1/payments"
        );
        assert_eq!(backend.token, "anon");
    }
}
