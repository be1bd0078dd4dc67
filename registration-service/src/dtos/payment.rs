use chrono::{DateTime, Utc};
use serde::Serialize;

use super::registration::PaymentView;
use crate::models::{FileUrls, RegistrationDetail, RegistrationStatus, ScholarshipType};

/// Current payment state of a registration.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusView {
    pub registration_id: i64,
    pub submission_id: String,
    pub scholarship_type: ScholarshipType,
    pub registration_status: RegistrationStatus,
    pub payment: Option<PaymentView>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentStatusView {
    pub fn new(detail: &RegistrationDetail, urls: &FileUrls) -> Self {
        let r = &detail.registration;
        Self {
            registration_id: r.id,
            submission_id: r.submission_id.clone(),
            scholarship_type: r.scholarship_type,
            registration_status: r.payment_status,
            payment: detail.active_payment().map(|p| PaymentView::new(p, urls)),
            updated_at: r.updated_at,
        }
    }
}
