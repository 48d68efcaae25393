//! Bulk upload of student accounts from a CSV file
//!
//! Every row is validated on its own, valid rows become accounts one at a time. Nothing is
//! rolled back, uploading the same file twice tries every row again.

use std::future::Future;
use std::time::Duration;

use csv::ReaderBuilder;
use csv::StringRecord;
use csv::Trim;
use serde::Serialize;
use thiserror::Error;

use crate::access::EmailPolicy;
use crate::password::derive_student_password;
use crate::utils::normalize_text;

/// Normalized headers accepted for the e-mail column
const EMAIL_HEADERS: [&str; 4] = ["email", "emailaddress", "emailid", "mail"];

/// Normalized headers accepted for the Moodle ID column
const MOODLE_ID_HEADERS: [&str; 3] = ["moodleid", "moodle", "studentid"];

/// Normalized headers accepted for the name column
const NAME_HEADERS: [&str; 3] = ["name", "fullname", "studentname"];

/// Problems with the file as a whole
#[derive(Debug, Error)]
pub enum BulkUploadError {
    /// None of the headers is an e-mail header
    #[error("CSV file has no email column")]
    MissingEmailColumn,

    /// The file is not valid CSV
    #[error("Invalid CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// A single row of the upload, as found in the file
#[derive(Clone, Debug, Default)]
pub struct BulkUserRow {
    /// Row number, the first row after the headers is 1
    pub row: usize,
    pub email: String,
    pub moodle_id: Option<String>,
    pub full_name: Option<String>,
}

/// A row that passed validation, ready to become an account
#[derive(Clone, Debug)]
pub struct ValidBulkUser {
    pub row: usize,
    /// Normalized e-mail address
    pub email: String,
    pub moodle_id: String,
    pub full_name: String,
    /// Derived from the Moodle ID
    pub password: String,
}

/// A created account
#[derive(Debug, Serialize)]
pub struct SuccessfulRow {
    pub row: usize,
    pub email: String,
    pub password: String,
}

/// A row that did not become an account
#[derive(Debug, Serialize)]
pub struct FailedRow {
    pub row: usize,
    pub email: String,
    pub reason: String,
}

/// Outcome of a bulk upload
#[derive(Debug, Default, Serialize)]
pub struct BulkUploadReport {
    /// Always the sum of successful and failed rows
    pub total: usize,
    pub successful: Vec<SuccessfulRow>,
    pub failed: Vec<FailedRow>,
}

impl BulkUploadReport {
    fn succeed(&mut self, user: ValidBulkUser) {
        self.total += 1;
        self.successful.push(SuccessfulRow {
            row: user.row,
            email: user.email,
            password: user.password,
        });
    }

    fn fail(&mut self, row: usize, email: String, reason: String) {
        self.total += 1;
        self.failed.push(FailedRow { row, email, reason });
    }
}

/// Normalize a header: lower-cased, only letters and digits
///
/// `"E-mail Address"` becomes `"emailaddress"`
pub fn normalize_header(header: &str) -> String {
    header
        .chars()
        .filter(|ch| ch.is_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Position of the first header that is one of the candidates
fn find_column(headers: &StringRecord, candidates: &[&str]) -> Option<usize> {
    headers
        .iter()
        .map(normalize_header)
        .position(|header| candidates.contains(&header.as_str()))
}

/// Get a non-empty field of a record
fn field(record: &StringRecord, column: Option<usize>) -> Option<String> {
    column
        .and_then(|column| record.get(column))
        .map(normalize_text)
        .filter(|value| !value.is_empty())
}

/// Parse the rows of a CSV file
///
/// # Errors
///
/// Will return `Err` when the file has no e-mail column or is not valid CSV
pub fn parse_csv(input: &str) -> Result<Vec<BulkUserRow>, BulkUploadError> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(input.as_bytes());

    let headers = reader.headers()?.clone();

    let email_column =
        find_column(&headers, &EMAIL_HEADERS).ok_or(BulkUploadError::MissingEmailColumn)?;
    let moodle_id_column = find_column(&headers, &MOODLE_ID_HEADERS);
    let name_column = find_column(&headers, &NAME_HEADERS);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;

        if record.iter().all(str::is_empty) {
            continue;
        }

        rows.push(BulkUserRow {
            row: rows.len() + 1,
            email: field(&record, Some(email_column)).unwrap_or_default(),
            moodle_id: field(&record, moodle_id_column),
            full_name: field(&record, name_column),
        });
    }

    Ok(rows)
}

/// Validate a single row
///
/// Checks, in order: an `@` in the e-mail, the institutional domain and a Moodle ID
///
/// # Errors
///
/// Will return `Err` with the reason when the row can not become an account
pub fn validate_row(row: &BulkUserRow, policy: &EmailPolicy) -> Result<ValidBulkUser, String> {
    if !row.email.contains('@') {
        return Err("Invalid email format".to_string());
    }

    let email = policy.check(&row.email)?;

    let Some(moodle_id) = &row.moodle_id else {
        return Err("Missing Moodle ID".to_string());
    };

    let full_name = row.full_name.clone().unwrap_or_else(|| {
        email
            .split_once('@')
            .map_or_else(|| email.clone(), |(local, _)| local.to_string())
    });

    Ok(ValidBulkUser {
        row: row.row,
        email,
        moodle_id: moodle_id.clone(),
        full_name,
        password: derive_student_password(moodle_id),
    })
}

/// Validate all rows and create an account for every valid one
///
/// Accounts are created one at a time, with `delay` between two creations. Invalid rows
/// never reach `create`.
pub async fn process_rows<F, Fut>(
    rows: Vec<BulkUserRow>,
    policy: &EmailPolicy,
    delay: Duration,
    mut create: F,
) -> BulkUploadReport
where
    F: FnMut(ValidBulkUser) -> Fut,
    Fut: Future<Output = Result<(), String>>,
{
    let mut report = BulkUploadReport::default();
    let mut created_any = false;

    for row in rows {
        let user = match validate_row(&row, policy) {
            Ok(user) => user,
            Err(reason) => {
                tracing::debug!("Bulk upload row {} rejected: {reason}", row.row);
                report.fail(row.row, row.email, reason);
                continue;
            }
        };

        if created_any && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        created_any = true;

        match create(user.clone()).await {
            Ok(()) => {
                tracing::debug!("Bulk upload row {} created `{}`", user.row, user.email);
                report.succeed(user);
            }
            Err(reason) => {
                tracing::warn!("Bulk upload row {} failed: {reason}", user.row);
                report.fail(user.row, user.email, reason);
            }
        }
    }

    report
}
