use serde::{Deserialize, Serialize};

use super::domain::{ApplicationDraft, ApplicationRecord, ProductType, Step};

/// Repayment schedule the backend expects on every intake record.
pub const REDEMPTION_METHOD: &str = "ANNUITY";

/// Merge-patch body for `UpdateApplication`. Absent fields are left untouched by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loan_type: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_payment_date: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redemption_method: Option<String>,
}

impl ApplicationPatch {
    /// Apply the patch to a record the way the backend merges it.
    pub fn merge_into(&self, record: &mut ApplicationRecord) {
        fn set<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
            if let Some(value) = value {
                *target = Some(value.clone());
            }
        }

        set(&mut record.loan_type, &self.loan_type);
        set(&mut record.kind, &self.kind);
        set(&mut record.term, &self.term);
        set(&mut record.amount, &self.amount);
        set(&mut record.iin, &self.iin);
        set(&mut record.last_name, &self.last_name);
        set(&mut record.first_name, &self.first_name);
        set(&mut record.middle_name, &self.middle_name);
        set(&mut record.phone, &self.phone);
        set(&mut record.preferred_payment_date, &self.preferred_payment_date);
        set(&mut record.redemption_method, &self.redemption_method);
    }
}

pub const fn loan_type_code(product: ProductType) -> &'static str {
    match product {
        ProductType::Loan => "CASH_LOAN",
        ProductType::Installment => "INSTALLMENT",
    }
}

fn product_from_record(record: &ApplicationRecord) -> Option<ProductType> {
    if let Some(kind) = record.kind.as_deref().and_then(ProductType::from_label) {
        return Some(kind);
    }
    match record.loan_type.as_deref() {
        Some("CASH_LOAN") => Some(ProductType::Loan),
        Some("INSTALLMENT") => Some(ProductType::Installment),
        _ => None,
    }
}

/// Fields the transition out of `step` persists.
///
/// Only the 2→3 transition writes to the backend; it carries the product fields
/// from step 1 together with the personal fields of step 2. Every other step
/// owns nothing on the wire.
pub fn patch_for_step(step: Step, draft: &ApplicationDraft) -> Option<ApplicationPatch> {
    match step {
        Step::ClientData => Some(client_data_patch(draft)),
        _ => None,
    }
}

fn client_data_patch(draft: &ApplicationDraft) -> ApplicationPatch {
    ApplicationPatch {
        loan_type: Some(loan_type_code(draft.product_type).to_string()),
        kind: Some(draft.product_type.label().to_string()),
        term: Some(draft.term),
        amount: draft.parsed_amount(),
        iin: Some(draft.iin.trim().to_string()),
        last_name: Some(draft.last_name.trim().to_string()),
        first_name: Some(draft.first_name.trim().to_string()),
        middle_name: draft
            .middle_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string),
        phone: draft.normalized_phone(),
        preferred_payment_date: draft.parsed_payment_day(),
        redemption_method: Some(REDEMPTION_METHOD.to_string()),
    }
}

/// Copy persisted record fields back into a draft.
///
/// Draft fields the record does not carry keep their current value, so resuming
/// an application never wipes what the applicant typed locally.
pub fn hydrate_draft(draft: &mut ApplicationDraft, record: &ApplicationRecord) {
    if let Some(product) = product_from_record(record) {
        draft.product_type = product;
    }
    if let Some(term) = record.term {
        draft.term = term;
    }
    if let Some(amount) = record.amount {
        draft.amount = amount.to_string();
    }
    if let Some(iin) = &record.iin {
        draft.iin = iin.clone();
    }
    if let Some(first_name) = &record.first_name {
        draft.first_name = first_name.clone();
    }
    if let Some(last_name) = &record.last_name {
        draft.last_name = last_name.clone();
    }
    if record.middle_name.is_some() {
        draft.middle_name = record.middle_name.clone();
    }
    if let Some(phone) = &record.phone {
        draft.phone = phone.clone();
    }
    if let Some(day) = record.preferred_payment_date {
        draft.preferred_payment_day = day.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft() -> ApplicationDraft {
        ApplicationDraft {
            product_type: ProductType::Installment,
            term: 24,
            amount: "250 000".to_string(),
            iin: "123456789012".to_string(),
            first_name: " Aigerim ".to_string(),
            last_name: "Nurlanova".to_string(),
            middle_name: Some("  ".to_string()),
            phone: "8 (701) 234-56-78".to_string(),
            preferred_payment_day: "28".to_string(),
            ..ApplicationDraft::default()
        }
    }

    fn empty_record() -> ApplicationRecord {
        serde_json::from_value(json!({ "id": "app-1", "status": "NEW" })).expect("record")
    }

    #[test]
    fn only_client_data_step_persists() {
        assert!(patch_for_step(Step::ProductSelection, &draft()).is_none());
        assert!(patch_for_step(Step::DocumentUpload, &draft()).is_none());
        assert!(patch_for_step(Step::ClientData, &draft()).is_some());
    }

    #[test]
    fn patch_uses_wire_field_names() {
        let patch = patch_for_step(Step::ClientData, &draft()).expect("patch");
        let wire = serde_json::to_value(&patch).expect("serializes");
        assert_eq!(
            wire,
            json!({
                "loanType": "INSTALLMENT",
                "type": "installment",
                "term": 24,
                "amount": 250000,
                "iin": "123456789012",
                "lastName": "Nurlanova",
                "firstName": "Aigerim",
                "phone": "+77012345678",
                "preferredPaymentDate": 28,
                "redemptionMethod": "ANNUITY"
            })
        );
    }

    #[test]
    fn merged_record_hydrates_identical_draft_values() {
        let patch = patch_for_step(Step::ClientData, &draft()).expect("patch");
        let mut record = empty_record();
        patch.merge_into(&mut record);

        let mut hydrated = ApplicationDraft::default();
        hydrate_draft(&mut hydrated, &record);

        assert_eq!(hydrated.product_type, ProductType::Installment);
        assert_eq!(hydrated.term, 24);
        assert_eq!(hydrated.amount, "250000");
        assert_eq!(hydrated.phone, "+77012345678");
        assert_eq!(hydrated.preferred_payment_day, "28");
        assert_eq!(hydrated.middle_name, None);

        let again = patch_for_step(Step::ClientData, &hydrated).expect("patch");
        assert_eq!(again, patch);
    }

    #[test]
    fn hydrate_keeps_local_values_the_record_lacks() {
        let mut local = draft();
        hydrate_draft(&mut local, &empty_record());
        assert_eq!(local, draft());
    }
}
