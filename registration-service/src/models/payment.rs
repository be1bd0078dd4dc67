use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::enums::PaymentMethod;
use super::status::{FraudStatus, RegistrationStatus, TransactionStatus};

/// One gateway order attempt for a registration.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: i64,
    pub registration_id: i64,
    pub order_id: String,
    pub amount_idr: i64,
    pub amount_usd: Decimal,
    pub fx_rate: Decimal,
    pub quoted_at: DateTime<Utc>,
    pub method: PaymentMethod,
    pub status: TransactionStatus,
    pub fraud_status: Option<FraudStatus>,
    pub payment_proof_file_id: Option<i64>,
    pub gateway_transaction_id: Option<String>,
    pub payment_type: Option<String>,
    pub snap_token: Option<String>,
    pub redirect_url: Option<String>,
    pub last_status_code: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Whether this payment alone makes its registration paid.
    pub fn is_settled(&self) -> bool {
        matches!(
            self.status,
            TransactionStatus::Settlement | TransactionStatus::Capture
        ) && matches!(self.fraud_status, None | Some(FraudStatus::Accept))
    }
}

/// A payment together with the status of the registration it belongs to.
#[derive(Debug, Clone, FromRow)]
pub struct PaymentRecord {
    #[sqlx(flatten)]
    pub payment: Payment,
    pub registration_status: RegistrationStatus,
}

/// Payment fields fixed at creation time.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub order_id: String,
    pub amount_idr: i64,
    pub amount_usd: Decimal,
    pub fx_rate: Decimal,
    pub quoted_at: DateTime<Utc>,
    pub method: PaymentMethod,
    pub payment_proof_file_id: Option<i64>,
    pub snap_token: Option<String>,
    pub redirect_url: Option<String>,
}

/// State written to a payment and its registration in one transaction.
///
/// Optional gateway fields only overwrite when present. `paid_at` is kept
/// from the first settlement.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentUpdate {
    pub status: TransactionStatus,
    pub fraud_status: Option<FraudStatus>,
    pub payment_type: Option<String>,
    pub gateway_transaction_id: Option<String>,
    pub status_code: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub registration_status: RegistrationStatus,
}

/// What `reconcile_payment` saw and what it wrote.
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub before: PaymentRecord,
    pub applied: Option<PaymentUpdate>,
}
