//! Registration orchestration.
//!
//! A submission reserves everything it needs (email, files, quote, order id),
//! opens the hosted checkout, and only then commits the registration,
//! submission and payment rows in one transaction. If the commit fails after
//! the gateway accepted the order, the order is cancelled again so no
//! checkout outlives its registration.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::error::{GatewayError, RegistrationError};
use crate::models::{
    admin_correction, age_on, AdminCorrection, Application, FileKind, FileUrls, FraudStatus,
    NewPayment, Page, Paging, PaymentChoice, PaymentMethod, PaymentRecord, PaymentUpdate,
    Registration, RegistrationDetail, RegistrationFilter, RegistrationStatus, ScholarshipType,
    Sort, SubmissionDetails, TransactionStatus,
};
use crate::services::currency::{whole_idr, CurrencyOracle, MAX_IDR_AMOUNT, MIN_IDR_AMOUNT};
use crate::services::export::build_workbook;
use crate::services::file_store::FileStore;
use crate::services::identifiers::{allocate_order_id, is_submission_id, new_submission_id};
use crate::services::metrics::SUBMISSIONS_TOTAL;
use crate::services::midtrans::{CheckoutRequest, CustomerDetails, ItemDetail, PaymentGateway};
use crate::services::repository::{
    NewRegistrationRecord, PaymentStats, RegistrationStats, RegistrationStore,
};
use crate::services::webhook::{apply_event, Decision, GatewayEvent};

/// Hosted checkouts expire after this many hours.
pub const PAYMENT_EXPIRY_HOURS: u32 = 24;

/// Result of deleting a registration.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub deleted: bool,
    /// Owned files that were removed from the file store.
    pub deleted_files: Vec<i64>,
}

/// Result of cancelling a pending order.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CancelOutcome {
    pub order_id: String,
    pub previous_status: TransactionStatus,
    pub new_status: TransactionStatus,
    pub registration_status: RegistrationStatus,
}

#[derive(Clone)]
pub struct RegistrationService {
    store: Arc<dyn RegistrationStore>,
    files: Arc<dyn FileStore>,
    oracle: Arc<dyn CurrencyOracle>,
    gateway: Arc<dyn PaymentGateway>,
    urls: FileUrls,
}

impl RegistrationService {
    pub fn new(
        store: Arc<dyn RegistrationStore>,
        files: Arc<dyn FileStore>,
        oracle: Arc<dyn CurrencyOracle>,
        gateway: Arc<dyn PaymentGateway>,
        urls: FileUrls,
    ) -> Self {
        Self {
            store,
            files,
            oracle,
            gateway,
            urls,
        }
    }

    pub async fn submit_fully_funded(
        &self,
        application: Application,
    ) -> Result<RegistrationDetail, RegistrationError> {
        self.expect_type(&application, ScholarshipType::FullyFunded)?;
        self.submit(application).await
    }

    pub async fn submit_self_funded(
        &self,
        application: Application,
    ) -> Result<RegistrationDetail, RegistrationError> {
        self.expect_type(&application, ScholarshipType::SelfFunded)?;
        self.submit(application).await
    }

    fn expect_type(
        &self,
        application: &Application,
        expected: ScholarshipType,
    ) -> Result<(), RegistrationError> {
        if application.details.scholarship_type() == expected {
            Ok(())
        } else {
            Err(RegistrationError::validation(
                "scholarshipType",
                &format!("scholarshipType must be {expected}"),
            ))
        }
    }

    /// Create a registration of either scholarship type.
    #[instrument(
        skip(self, application),
        fields(
            scholarship_type = %application.details.scholarship_type(),
            method = %application.payment.method()
        )
    )]
    pub async fn submit(
        &self,
        application: Application,
    ) -> Result<RegistrationDetail, RegistrationError> {
        let scholarship_type = application.details.scholarship_type();
        let method = application.payment.method();

        let result = self.create(application).await;
        let outcome = match &result {
            Ok(_) => "created",
            Err(e) => e.kind(),
        };
        SUBMISSIONS_TOTAL
            .with_label_values(&[scholarship_type.as_str(), method.as_str(), outcome])
            .inc();
        result
    }

    async fn create(&self, application: Application) -> Result<RegistrationDetail, RegistrationError> {
        let Application {
            applicant,
            details,
            payment,
        } = application;
        let scholarship_type = details.scholarship_type();

        if self.store.email_in_use(&applicant.email).await? {
            return Err(RegistrationError::EmailAlreadyRegistered);
        }

        match &details {
            SubmissionDetails::FullyFunded { essay_file_id, .. } => {
                self.require_file(*essay_file_id, FileKind::Essay).await?
            }
            SubmissionDetails::SelfFunded {
                headshot_file_id, ..
            } => self.require_file(*headshot_file_id, FileKind::Headshot).await?,
        }
        if let PaymentChoice::Paypal { proof_file_id } = payment {
            self.require_file(proof_file_id, FileKind::PaymentProof).await?;
        }

        let amount_usd = scholarship_type.usd_amount();
        let quote = self.oracle.quote_usd_to_idr(amount_usd).await?;
        let amount_idr = whole_idr(quote.idr_amount).ok_or_else(|| {
            RegistrationError::validation(
                "amountIdr",
                &format!(
                    "Converted amount {} IDR is outside {MIN_IDR_AMOUNT}..={MAX_IDR_AMOUNT}",
                    quote.idr_amount.round()
                ),
            )
        })?;

        let order_id = allocate_order_id(&*self.store).await?;
        let now = Utc::now();
        let submission_id = new_submission_id(now);
        let age = age_on(applicant.date_of_birth, now.date_naive());

        let session = match payment {
            PaymentChoice::Midtrans => {
                let request = CheckoutRequest {
                    order_id: order_id.clone(),
                    gross_amount: amount_idr,
                    expiry_hours: PAYMENT_EXPIRY_HOURS,
                    customer: CustomerDetails {
                        first_name: applicant.full_name.clone(),
                        email: applicant.email.clone(),
                        phone: applicant.whatsapp.clone(),
                    },
                    items: vec![ItemDetail {
                        id: scholarship_type.item_id().to_string(),
                        price: amount_idr,
                        quantity: 1,
                        name: scholarship_type.item_name().to_string(),
                    }],
                };
                Some(self.gateway.create_transaction(&request).await?)
            }
            PaymentChoice::Paypal { .. } => None,
        };

        let record = NewRegistrationRecord {
            submission_id,
            applicant,
            age,
            details,
            payment: NewPayment {
                order_id: order_id.clone(),
                amount_idr,
                amount_usd,
                fx_rate: quote.rate,
                quoted_at: quote.quoted_at,
                method: payment.method(),
                payment_proof_file_id: payment.proof_file_id(),
                snap_token: session.as_ref().map(|s| s.token.clone()),
                redirect_url: session.as_ref().map(|s| s.redirect_url.clone()),
            },
        };

        match self.store.create_registration(record).await {
            Ok(detail) => {
                info!(
                    registration_id = detail.registration.id,
                    submission_id = %detail.registration.submission_id,
                    order_id = %order_id,
                    amount_idr,
                    "Registration created"
                );
                Ok(detail)
            }
            Err(err) => {
                if session.is_some() {
                    self.compensate(&order_id).await;
                }
                Err(err.into())
            }
        }
    }

    /// Cancel a checkout whose registration was never committed.
    async fn compensate(&self, order_id: &str) {
        match self.gateway.cancel(order_id).await {
            Ok(_) | Err(GatewayError::OrderNotFound) => {
                warn!(order_id, "Cancelled checkout of uncommitted registration")
            }
            Err(e) => error!(
                order_id,
                error = %e,
                "Failed to cancel checkout of uncommitted registration"
            ),
        }
    }

    async fn require_file(&self, file_id: i64, kind: FileKind) -> Result<(), RegistrationError> {
        let record = self
            .files
            .get(file_id)
            .await?
            .ok_or(RegistrationError::FileNotFound(file_id))?;
        if record.kind != kind || !kind.accepts(&record.mime_type) {
            return Err(RegistrationError::FileKindMismatch {
                file_id,
                expected: kind.policy_description(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_by_id(&self, id: i64) -> Result<RegistrationDetail, RegistrationError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| RegistrationError::NotFound("Registration".into()))
    }

    #[instrument(skip(self))]
    pub async fn get_by_submission_id(
        &self,
        submission_id: &str,
    ) -> Result<RegistrationDetail, RegistrationError> {
        if !is_submission_id(submission_id) {
            return Err(RegistrationError::NotFound("Registration".into()));
        }
        self.store
            .find_by_submission_id(submission_id)
            .await?
            .ok_or_else(|| RegistrationError::NotFound("Registration".into()))
    }

    pub async fn list(
        &self,
        filter: &RegistrationFilter,
        sort: Sort,
        paging: Paging,
    ) -> Result<Page<Registration>, RegistrationError> {
        Ok(self.store.list(filter, sort, paging).await?)
    }

    /// Registrations created inside the filter's date range, oldest first.
    pub async fn by_date_range(
        &self,
        filter: &RegistrationFilter,
    ) -> Result<Vec<RegistrationDetail>, RegistrationError> {
        Ok(self.store.list_details(filter).await?)
    }

    /// Administrative status correction.
    ///
    /// The change is mirrored onto the active payment so that a paid
    /// registration always has a settled payment.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        id: i64,
        to: RegistrationStatus,
    ) -> Result<RegistrationDetail, RegistrationError> {
        let detail = self.get_by_id(id).await?;
        let from = detail.registration.payment_status;
        match admin_correction(from, to) {
            AdminCorrection::Unchanged => return Ok(detail),
            AdminCorrection::Forbidden => {
                return Err(RegistrationError::InvalidTransition { from, to })
            }
            AdminCorrection::Apply => {}
        }

        let order_id = detail
            .active_payment()
            .map(|p| p.order_id.clone())
            .ok_or_else(|| {
                RegistrationError::Internal(anyhow::anyhow!("registration {id} has no payment"))
            })?;

        let now = Utc::now();
        let decide = |current: &PaymentRecord| {
            if admin_correction(current.registration_status, to) != AdminCorrection::Apply {
                return None;
            }
            admin_update(to, now)
        };
        let reconciled = self
            .store
            .reconcile_payment(&order_id, &decide)
            .await?
            .ok_or_else(|| RegistrationError::NotFound("Payment".into()))?;

        if reconciled.applied.is_none() {
            let current = reconciled.before.registration_status;
            if admin_correction(current, to) == AdminCorrection::Forbidden {
                return Err(RegistrationError::InvalidTransition { from: current, to });
            }
        } else {
            info!(registration_id = id, from = %from, to = %to, "Registration status corrected");
        }
        self.get_by_id(id).await
    }

    /// Delete a registration, its submission and payments, then the files
    /// it owned that nothing else references.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: i64) -> Result<DeleteOutcome, RegistrationError> {
        let detail = self.get_by_id(id).await?;
        let owned = detail.owned_file_ids();

        if !self.store.delete(id).await? {
            return Err(RegistrationError::NotFound("Registration".into()));
        }

        let mut deleted_files = Vec::new();
        for file_id in owned {
            if self.store.file_reference_count(file_id).await? > 0 {
                continue;
            }
            match self.files.delete(file_id).await {
                Ok(true) => deleted_files.push(file_id),
                Ok(false) => {}
                Err(e) => warn!(file_id, error = %e, "Failed to delete owned file"),
            }
        }

        info!(registration_id = id, files = deleted_files.len(), "Registration deleted");
        Ok(DeleteOutcome {
            deleted: true,
            deleted_files,
        })
    }

    pub async fn check_email_exists(&self, email: &str) -> Result<bool, RegistrationError> {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            return Err(RegistrationError::validation("email", "email is required"));
        }
        Ok(self.store.email_in_use(&email).await?)
    }

    /// XLSX workbook of every matching registration.
    #[instrument(skip(self))]
    pub async fn export_all(&self, filter: &RegistrationFilter) -> Result<Vec<u8>, RegistrationError> {
        let details = self.store.list_details(filter).await?;
        let bytes = build_workbook(&details, &self.urls)
            .map_err(|e| RegistrationError::Internal(anyhow::Error::new(e)))?;
        info!(registrations = details.len(), bytes = bytes.len(), "Export generated");
        Ok(bytes)
    }

    pub async fn payment_status(
        &self,
        registration_id: i64,
    ) -> Result<RegistrationDetail, RegistrationError> {
        self.get_by_id(registration_id).await
    }

    /// Cancel a hosted checkout that has not been paid.
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: &str) -> Result<CancelOutcome, RegistrationError> {
        let record = self
            .store
            .find_payment(order_id)
            .await?
            .ok_or_else(|| RegistrationError::OrderNotFound(order_id.to_string()))?;
        let previous_status = record.payment.status;
        if record.payment.method != PaymentMethod::Midtrans
            || previous_status != TransactionStatus::Pending
        {
            return Err(RegistrationError::InvalidState(previous_status));
        }

        let transaction = self.gateway.cancel(order_id).await.map_err(|e| match e {
            GatewayError::OrderNotFound => RegistrationError::OrderNotFound(order_id.to_string()),
            GatewayError::InvalidState => RegistrationError::InvalidState(previous_status),
            other => RegistrationError::GatewayUnavailable(other),
        })?;

        let event = GatewayEvent::from_transaction(&transaction)
            .unwrap_or_else(|| GatewayEvent::new(TransactionStatus::Cancel));
        let applied = apply_event(&*self.store, order_id, &event, Utc::now())
            .await?
            .ok_or_else(|| RegistrationError::OrderNotFound(order_id.to_string()))?;
        if let Decision::Apply { transition, .. } = &applied.decision {
            info!(?transition, "Order cancelled");
        }

        Ok(CancelOutcome {
            order_id: order_id.to_string(),
            previous_status,
            new_status: applied.payment_status(),
            registration_status: applied.registration_status(),
        })
    }

    pub async fn statistics(&self) -> Result<RegistrationStats, RegistrationError> {
        Ok(self.store.registration_stats(start_of_today()).await?)
    }

    pub async fn payment_statistics(&self) -> Result<PaymentStats, RegistrationError> {
        Ok(self.store.payment_stats().await?)
    }

    pub fn file_urls(&self) -> &FileUrls {
        &self.urls
    }
}

/// Payment write mirroring an admin status change.
fn admin_update(to: RegistrationStatus, now: DateTime<Utc>) -> Option<PaymentUpdate> {
    let (status, fraud_status, paid_at) = match to {
        RegistrationStatus::Paid => (
            TransactionStatus::Settlement,
            Some(FraudStatus::Accept),
            Some(now),
        ),
        RegistrationStatus::Failed => (TransactionStatus::Deny, None, None),
        RegistrationStatus::Expired => (TransactionStatus::Expire, None, None),
        RegistrationStatus::Pending => return None,
    };
    Some(PaymentUpdate {
        status,
        fraud_status,
        payment_type: None,
        gateway_transaction_id: None,
        status_code: None,
        paid_at,
        registration_status: to,
    })
}

fn start_of_today() -> DateTime<Utc> {
    Utc::now()
        .date_naive()
        .and_time(chrono::NaiveTime::MIN)
        .and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_paid_settles_the_payment() {
        let now = Utc::now();
        let update = admin_update(RegistrationStatus::Paid, now).unwrap();
        assert_eq!(update.status, TransactionStatus::Settlement);
        assert_eq!(update.fraud_status, Some(FraudStatus::Accept));
        assert_eq!(update.paid_at, Some(now));

        let update = admin_update(RegistrationStatus::Expired, now).unwrap();
        assert_eq!(update.status, TransactionStatus::Expire);
        assert_eq!(update.paid_at, None);

        assert!(admin_update(RegistrationStatus::Pending, now).is_none());
    }
}
