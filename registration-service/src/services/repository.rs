//! Registration persistence seam.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StoreError;
use crate::models::{
    Applicant, NewPayment, Page, Paging, Payment, PaymentRecord, PaymentUpdate, Reconciled,
    Registration, RegistrationDetail, RegistrationFilter, Sort, SubmissionDetails,
};

/// Everything written by a successful submission.
#[derive(Debug, Clone)]
pub struct NewRegistrationRecord {
    pub submission_id: String,
    pub applicant: Applicant,
    pub age: i32,
    pub details: SubmissionDetails,
    pub payment: NewPayment,
}

/// Decides the write for a locked payment row; `None` leaves it untouched.
pub type ReconcileFn<'a> = &'a (dyn Fn(&PaymentRecord) -> Option<PaymentUpdate> + Send + Sync);

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationStats {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_scholarship_type: BTreeMap<String, i64>,
    pub created_today: i64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStats {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_method: BTreeMap<String, i64>,
    /// Sum of `amountIdr` over settled payments of paid registrations.
    pub paid_amount_idr: i64,
}

#[async_trait]
pub trait RegistrationStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    /// Whether `email` belongs to a registration that is neither failed nor expired.
    async fn email_in_use(&self, email: &str) -> Result<bool, StoreError>;

    async fn next_order_sequence(&self) -> Result<i64, StoreError>;

    async fn order_id_exists(&self, order_id: &str) -> Result<bool, StoreError>;

    /// Insert registration, submission and payment in one transaction.
    async fn create_registration(
        &self,
        new: NewRegistrationRecord,
    ) -> Result<RegistrationDetail, StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<RegistrationDetail>, StoreError>;

    async fn find_by_submission_id(
        &self,
        submission_id: &str,
    ) -> Result<Option<RegistrationDetail>, StoreError>;

    async fn list(
        &self,
        filter: &RegistrationFilter,
        sort: Sort,
        paging: Paging,
    ) -> Result<Page<Registration>, StoreError>;

    /// Every matching registration with submission and payments, oldest first.
    async fn list_details(
        &self,
        filter: &RegistrationFilter,
    ) -> Result<Vec<RegistrationDetail>, StoreError>;

    /// Delete a registration with its submission and payments.
    async fn delete(&self, id: i64) -> Result<bool, StoreError>;

    /// How many submissions and payments point at `file_id`.
    async fn file_reference_count(&self, file_id: i64) -> Result<i64, StoreError>;

    async fn find_payment(&self, order_id: &str) -> Result<Option<PaymentRecord>, StoreError>;

    /// Lock the payment for `order_id`, let `decide` pick the write, apply it
    /// to the payment and its registration, and commit.
    ///
    /// Returns `None` when no payment has this order id.
    async fn reconcile_payment(
        &self,
        order_id: &str,
        decide: ReconcileFn<'_>,
    ) -> Result<Option<Reconciled>, StoreError>;

    /// Hosted-checkout payments still pending that were created before `cutoff`.
    async fn stale_pending_payments(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, StoreError>;

    async fn registration_stats(
        &self,
        since: DateTime<Utc>,
    ) -> Result<RegistrationStats, StoreError>;

    async fn payment_stats(&self) -> Result<PaymentStats, StoreError>;
}
