use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Smallest amount a client may request.
pub const MIN_AMOUNT: u64 = 10_000;
/// Largest amount a client may request.
pub const MAX_AMOUNT: u64 = 3_000_000;
/// Statement uploads above this size are rejected before any network call.
pub const MAX_DOCUMENT_BYTES: usize = 10 * 1024 * 1024;
/// Number of digits in an IIN.
pub const IIN_LENGTH: usize = 12;
/// Number of digits in a one-time password.
pub const OTP_LENGTH: usize = 6;
/// Country calling code used when normalizing phone numbers.
pub const PHONE_COUNTRY_CODE: &str = "7";
/// Subscriber digits following the country code.
pub const PHONE_SUBSCRIBER_DIGITS: usize = 10;
/// Earliest and latest preferred monthly payment day.
pub const PAYMENT_DAY_RANGE: std::ops::RangeInclusive<u8> = 1..=28;
/// Default loan term in months for a fresh draft.
pub const DEFAULT_TERM_MONTHS: u32 = 12;

const PDF_MAGIC: &[u8] = b"%PDF";

/// Identifier of the backend application record backing a wizard session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationId(pub String);

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the bank that issued an uploaded statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BankId(pub String);

/// Credit product selected on the first step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    #[default]
    Loan,
    Installment,
}

impl ProductType {
    pub const fn label(self) -> &'static str {
        match self {
            ProductType::Loan => "loan",
            ProductType::Installment => "installment",
        }
    }

    pub fn from_label(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "loan" => Some(ProductType::Loan),
            "installment" => Some(ProductType::Installment),
            _ => None,
        }
    }
}

/// Wizard steps in the order the applicant walks through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    ProductSelection,
    ClientData,
    DocumentUpload,
    OtpVerification,
    Outcome,
}

impl Step {
    pub const fn number(self) -> u8 {
        match self {
            Step::ProductSelection => 1,
            Step::ClientData => 2,
            Step::DocumentUpload => 3,
            Step::OtpVerification => 4,
            Step::Outcome => 5,
        }
    }

    /// Previous step reachable through `back()`, if any.
    pub const fn previous(self) -> Option<Step> {
        match self {
            Step::ClientData => Some(Step::ProductSelection),
            Step::DocumentUpload => Some(Step::ClientData),
            _ => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Step::ProductSelection => "product_selection",
            Step::ClientData => "client_data",
            Step::DocumentUpload => "document_upload",
            Step::OtpVerification => "otp_verification",
            Step::Outcome => "outcome",
        };
        f.write_str(label)
    }
}

/// Reference to the statement currently attached to the draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentReference {
    pub file_name: String,
    pub size_bytes: usize,
    pub bank_id: BankId,
    pub uploaded_at: DateTime<Utc>,
}

/// Client-side form state collected across the wizard steps.
///
/// Numeric inputs are kept as raw text so validation can report exactly what
/// the applicant typed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationDraft {
    pub product_type: ProductType,
    pub term: u32,
    pub amount: String,
    pub iin: String,
    pub first_name: String,
    pub last_name: String,
    pub middle_name: Option<String>,
    pub phone: String,
    pub preferred_payment_day: String,
    pub document: Option<DocumentReference>,
    pub otp: String,
}

impl Default for ApplicationDraft {
    fn default() -> Self {
        Self {
            product_type: ProductType::default(),
            term: DEFAULT_TERM_MONTHS,
            amount: String::new(),
            iin: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            middle_name: None,
            phone: String::new(),
            preferred_payment_day: String::new(),
            document: None,
            otp: String::new(),
        }
    }
}

impl ApplicationDraft {
    pub fn parsed_amount(&self) -> Option<u64> {
        parse_amount(&self.amount)
    }

    pub fn parsed_payment_day(&self) -> Option<u8> {
        let day = self.preferred_payment_day.trim();
        if day.is_empty() || !day.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        day.parse::<u8>().ok()
    }

    pub fn normalized_phone(&self) -> Option<String> {
        normalize_phone(&self.phone)
    }
}

/// Partial update of the draft coming from user input. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftInput {
    #[serde(default)]
    pub product_type: Option<ProductType>,
    #[serde(default)]
    pub term: Option<u32>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub iin: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub middle_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub preferred_payment_day: Option<String>,
}

impl DraftInput {
    pub(crate) fn apply_to(self, draft: &mut ApplicationDraft) {
        if let Some(product_type) = self.product_type {
            draft.product_type = product_type;
        }
        if let Some(term) = self.term {
            draft.term = term;
        }
        if let Some(amount) = self.amount {
            draft.amount = amount;
        }
        if let Some(iin) = self.iin {
            draft.iin = iin;
        }
        if let Some(first_name) = self.first_name {
            draft.first_name = first_name;
        }
        if let Some(last_name) = self.last_name {
            draft.last_name = last_name;
        }
        if let Some(middle_name) = self.middle_name {
            let trimmed = middle_name.trim();
            draft.middle_name = if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            };
        }
        if let Some(phone) = self.phone {
            draft.phone = phone;
        }
        if let Some(day) = self.preferred_payment_day {
            draft.preferred_payment_day = day;
        }
    }
}

/// Backend application entity. The backend owns it; the wizard only caches snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRecord {
    pub id: String,
    #[serde(default)]
    pub short_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub amount: Option<u64>,
    #[serde(default)]
    pub term: Option<u32>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub loan_type: Option<String>,
    #[serde(default)]
    pub iin: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub middle_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub preferred_payment_date: Option<u8>,
    #[serde(default)]
    pub redemption_method: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ApplicationRecord {
    pub fn application_id(&self) -> ApplicationId {
        ApplicationId(self.id.clone())
    }
}

/// Statement file accepted for verification.
#[derive(Clone, PartialEq, Eq)]
pub struct StatementDocument {
    file_name: String,
    bytes: Vec<u8>,
}

impl fmt::Debug for StatementDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementDocument")
            .field("file_name", &self.file_name)
            .field("size_bytes", &self.bytes.len())
            .finish()
    }
}

/// File as received from the uploader, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl StatementDocument {
    /// Validate an upload: one non-empty PDF of at most [`MAX_DOCUMENT_BYTES`].
    pub fn from_upload(file: UploadedFile) -> Result<Self, DocumentError> {
        if file.bytes.is_empty() {
            return Err(DocumentError::Empty);
        }
        if file.bytes.len() > MAX_DOCUMENT_BYTES {
            return Err(DocumentError::TooLarge {
                size: file.bytes.len(),
                max: MAX_DOCUMENT_BYTES,
            });
        }

        let declared_pdf = match file.content_type.as_deref() {
            Some(content_type) => content_type
                .split(';')
                .next()
                .map(|essence| essence.trim().eq_ignore_ascii_case("application/pdf"))
                .unwrap_or(false),
            None => mime_guess::from_path(&file.file_name)
                .first()
                .map(|mime| mime.essence_str() == "application/pdf")
                .unwrap_or(false),
        };
        if !declared_pdf || !file.bytes.starts_with(PDF_MAGIC) {
            return Err(DocumentError::NotPdf {
                file_name: file.file_name,
            });
        }

        Ok(Self {
            file_name: file.file_name,
            bytes: file.bytes,
        })
    }

    /// Validate a batch coming from a multi-file picker; exactly one file is allowed.
    pub fn from_uploads(mut files: Vec<UploadedFile>) -> Result<Self, DocumentError> {
        match files.len() {
            0 => Err(DocumentError::Empty),
            1 => Self::from_upload(files.remove(0)),
            count => Err(DocumentError::MultipleFiles { count }),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Upload rejected before any network call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    #[error("only one statement file can be attached (received {count})")]
    MultipleFiles { count: usize },
    #[error("the statement file is empty")]
    Empty,
    #[error("{file_name} is not a PDF document")]
    NotPdf { file_name: String },
    #[error("statement is {size} bytes, the limit is {max} bytes")]
    TooLarge { size: usize, max: usize },
}

/// Parse an amount typed by the applicant. Spaces used as thousands separators are accepted.
///
/// Digit strings too long for `u64` saturate to `u64::MAX`.
pub fn parse_amount(raw: &str) -> Option<u64> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() || !compact.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(compact.parse::<u64>().unwrap_or(u64::MAX))
}

/// Normalize a phone number to `+7XXXXXXXXXX`.
///
/// Mask characters (spaces, parentheses, dashes, the leading `+`) are ignored. A
/// trunk prefix `8` is treated as the country code when no `+` was typed.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let allowed = |c: char| c.is_ascii_digit() || matches!(c, ' ' | '(' | ')' | '-' | '+');
    if raw.trim().is_empty() || !raw.chars().all(allowed) {
        return None;
    }

    let international = raw.contains('+');
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let subscriber = match digits.len() {
        PHONE_SUBSCRIBER_DIGITS if !international => digits.as_str(),
        n if n == PHONE_SUBSCRIBER_DIGITS + 1 => {
            let (prefix, rest) = digits.split_at(1);
            if prefix == PHONE_COUNTRY_CODE || (prefix == "8" && !international) {
                rest
            } else {
                return None;
            }
        }
        _ => return None,
    };

    Some(format!("+{PHONE_COUNTRY_CODE}{subscriber}"))
}

/// Keep only ASCII digits of an OTP entry, truncated to [`OTP_LENGTH`].
pub fn sanitize_otp(raw: &str) -> String {
    raw.chars()
        .filter(char::is_ascii_digit)
        .take(OTP_LENGTH)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdf(name: &str, content_type: Option<&str>) -> UploadedFile {
        UploadedFile {
            file_name: name.to_string(),
            content_type: content_type.map(str::to_string),
            bytes: b"%PDF-1.7 statement".to_vec(),
        }
    }

    #[test]
    fn normalize_phone_accepts_masked_and_trunk_prefixed_input() {
        assert_eq!(
            normalize_phone("+7 (701) 234-56-78").as_deref(),
            Some("+77012345678")
        );
        assert_eq!(normalize_phone("87012345678").as_deref(), Some("+77012345678"));
        assert_eq!(normalize_phone("7012345678").as_deref(), Some("+77012345678"));
    }

    #[test]
    fn normalize_phone_rejects_partial_or_foreign_numbers() {
        assert_eq!(normalize_phone("+7 (701) 234-56"), None);
        assert_eq!(normalize_phone("+1 (701) 234-56-78"), None);
        assert_eq!(normalize_phone("+7012345678"), None);
        assert_eq!(normalize_phone("7012345678x"), None);
        assert_eq!(normalize_phone("+8 701 234 56 78"), None);
        assert_eq!(normalize_phone(""), None);
    }

    #[test]
    fn parse_amount_ignores_group_separators() {
        assert_eq!(parse_amount("150 000"), Some(150_000));
        assert_eq!(parse_amount("5000"), Some(5000));
        assert_eq!(parse_amount("12.5"), None);
        assert_eq!(parse_amount("  "), None);
        assert_eq!(parse_amount("+5000"), None);
    }

    #[test]
    fn parse_amount_saturates_on_overflow() {
        assert_eq!(parse_amount("99999999999999999999999"), Some(u64::MAX));
    }

    #[test]
    fn payment_day_rejects_signs() {
        let mut draft = ApplicationDraft::default();
        draft.preferred_payment_day = "+5".to_string();
        assert_eq!(draft.parsed_payment_day(), None);
        draft.preferred_payment_day = " 5 ".to_string();
        assert_eq!(draft.parsed_payment_day(), Some(5));
    }

    #[test]
    fn sanitize_otp_strips_non_digits_and_truncates() {
        assert_eq!(sanitize_otp("12-34 56"), "123456");
        assert_eq!(sanitize_otp("1234567"), "123456");
        assert_eq!(sanitize_otp("abc"), "");
    }

    #[test]
    fn statement_upload_requires_single_pdf_within_limit() {
        assert!(StatementDocument::from_upload(pdf("march.pdf", None)).is_ok());
        assert!(StatementDocument::from_upload(pdf("march", Some("application/pdf"))).is_ok());

        let not_pdf = StatementDocument::from_upload(pdf("march.png", Some("image/png")));
        assert!(matches!(not_pdf, Err(DocumentError::NotPdf { .. })));

        let mut forged = pdf("march.pdf", None);
        forged.bytes = b"PK\x03\x04".to_vec();
        assert!(matches!(
            StatementDocument::from_upload(forged),
            Err(DocumentError::NotPdf { .. })
        ));

        let mut oversized = pdf("big.pdf", None);
        oversized.bytes.resize(MAX_DOCUMENT_BYTES + 1, b'0');
        assert!(matches!(
            StatementDocument::from_upload(oversized),
            Err(DocumentError::TooLarge { .. })
        ));

        let batch = vec![pdf("a.pdf", None), pdf("b.pdf", None)];
        assert_eq!(
            StatementDocument::from_uploads(batch),
            Err(DocumentError::MultipleFiles { count: 2 })
        );
    }

    #[test]
    fn step_navigation_is_forward_biased() {
        assert_eq!(Step::ProductSelection.previous(), None);
        assert_eq!(Step::ClientData.previous(), Some(Step::ProductSelection));
        assert_eq!(Step::DocumentUpload.previous(), Some(Step::ClientData));
        assert_eq!(Step::OtpVerification.previous(), None);
        assert_eq!(Step::Outcome.previous(), None);
        assert_eq!(Step::OtpVerification.number(), 4);
    }
}
