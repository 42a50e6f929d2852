use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::domain::{
    normalize_phone, parse_amount, ApplicationDraft, Step, IIN_LENGTH, MAX_AMOUNT, MIN_AMOUNT,
    OTP_LENGTH, PAYMENT_DAY_RANGE,
};

/// Draft fields that carry user input subject to validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftField {
    Amount,
    Iin,
    FirstName,
    LastName,
    Phone,
    PreferredPaymentDay,
    Otp,
}

/// Field-scoped validation messages. Empty means the step is valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<DraftField, String>);

impl FieldErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: DraftField) -> Option<&str> {
        self.0.get(&field).map(String::as_str)
    }

    pub fn contains(&self, field: DraftField) -> bool {
        self.0.contains_key(&field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (DraftField, &str)> {
        self.0.iter().map(|(field, message)| (*field, message.as_str()))
    }

    fn insert(&mut self, field: DraftField, message: impl Into<String>) {
        self.0.insert(field, message.into());
    }
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (field, message) in self.iter() {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{field:?}: {message}")?;
            first = false;
        }
        Ok(())
    }
}

/// Run the validator owned by `step` against the draft.
pub fn validate_step(step: Step, draft: &ApplicationDraft) -> FieldErrors {
    match step {
        Step::ProductSelection => validate_product_selection(draft),
        Step::ClientData => validate_client_data(draft),
        Step::DocumentUpload | Step::Outcome => FieldErrors::default(),
        Step::OtpVerification => validate_otp(&draft.otp),
    }
}

pub fn validate_product_selection(draft: &ApplicationDraft) -> FieldErrors {
    let mut errors = FieldErrors::default();
    if let Some(message) = amount_error(&draft.amount) {
        errors.insert(DraftField::Amount, message);
    }
    errors
}

pub fn validate_client_data(draft: &ApplicationDraft) -> FieldErrors {
    let mut errors = FieldErrors::default();

    if !is_valid_iin(&draft.iin) {
        errors.insert(DraftField::Iin, "IIN must contain exactly 12 digits");
    }
    if draft.first_name.trim().is_empty() {
        errors.insert(DraftField::FirstName, "Enter your first name");
    }
    if draft.last_name.trim().is_empty() {
        errors.insert(DraftField::LastName, "Enter your last name");
    }
    if normalize_phone(&draft.phone).is_none() {
        errors.insert(
            DraftField::Phone,
            "Enter the phone number in the format +7 (XXX) XXX-XX-XX",
        );
    }
    match draft.parsed_payment_day() {
        Some(day) if PAYMENT_DAY_RANGE.contains(&day) => {}
        _ => errors.insert(
            DraftField::PreferredPaymentDay,
            "Choose a payment day between 1 and 28",
        ),
    }

    errors
}

pub fn validate_otp(code: &str) -> FieldErrors {
    let mut errors = FieldErrors::default();
    if !is_complete_otp(code) {
        errors.insert(DraftField::Otp, "Enter the 6-digit code");
    }
    errors
}

pub fn is_valid_iin(iin: &str) -> bool {
    iin.len() == IIN_LENGTH && iin.chars().all(|c| c.is_ascii_digit())
}

pub fn is_complete_otp(code: &str) -> bool {
    code.len() == OTP_LENGTH && code.chars().all(|c| c.is_ascii_digit())
}

fn amount_error(raw: &str) -> Option<&'static str> {
    if raw.trim().is_empty() {
        return Some("Enter the amount");
    }
    match parse_amount(raw) {
        None => Some("Amount must be a number"),
        Some(amount) if amount < MIN_AMOUNT => Some("Minimum amount is 10 000"),
        Some(amount) if amount > MAX_AMOUNT => Some("Maximum amount is 3 000 000"),
        Some(_) => None,
    }
}
