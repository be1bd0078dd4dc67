//! Payment notification processing.
//!
//! Every change of a payment's gateway state (notifications, admin-triggered
//! cancellation, the expiry sweep) goes through [`apply_event`]: the payment
//! row is locked, [`plan`] decides the write from the locked state, and the
//! payment and its registration are updated in the same transaction.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::error::{RegistrationError, StoreError};
use crate::models::{
    transition, FraudStatus, PaymentEvent, PaymentMethod, PaymentRecord, PaymentUpdate,
    RegistrationStatus, TransactionStatus, Transition, UnknownVariant,
};
use crate::services::metrics::WEBHOOKS_TOTAL;
use crate::services::midtrans::{GatewayTransaction, PaymentGateway, WebhookNotification};
use crate::services::repository::RegistrationStore;

/// A state reported by the gateway for one order.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayEvent {
    pub status: TransactionStatus,
    pub fraud_status: Option<FraudStatus>,
    pub status_code: Option<String>,
    pub gross_amount: Option<Decimal>,
    pub payment_type: Option<String>,
    pub transaction_id: Option<String>,
}

impl GatewayEvent {
    pub fn new(status: TransactionStatus) -> Self {
        Self {
            status,
            fraud_status: None,
            status_code: None,
            gross_amount: None,
            payment_type: None,
            transaction_id: None,
        }
    }

    pub fn from_notification(notification: &WebhookNotification) -> Result<Self, UnknownVariant> {
        Ok(Self {
            status: notification.transaction_status.parse()?,
            fraud_status: parse_optional(notification.fraud_status.as_deref())?,
            status_code: Some(notification.status_code.clone()),
            gross_amount: Decimal::from_str(&notification.gross_amount).ok(),
            payment_type: notification.payment_type.clone(),
            transaction_id: notification.transaction_id.clone(),
        })
    }

    /// `None` when the transaction carries no usable status.
    pub fn from_transaction(transaction: &GatewayTransaction) -> Option<Self> {
        let status = transaction.transaction_status.as_deref()?.parse().ok()?;
        Some(Self {
            status,
            fraud_status: parse_optional(transaction.fraud_status.as_deref()).ok()?,
            status_code: transaction.status_code.clone(),
            gross_amount: transaction
                .gross_amount
                .as_deref()
                .and_then(|a| Decimal::from_str(a).ok()),
            payment_type: transaction.payment_type.clone(),
            transaction_id: transaction.transaction_id.clone(),
        })
    }
}

fn parse_optional<T: FromStr<Err = UnknownVariant>>(
    value: Option<&str>,
) -> Result<Option<T>, UnknownVariant> {
    value
        .filter(|v| !v.is_empty())
        .map(str::parse)
        .transpose()
}

/// What to do with an event given the locked payment state.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Same `(status, fraud)` pair and status code as already recorded.
    Duplicate,
    /// Manual-transfer payments only change through admin review.
    ManualReview,
    /// The reported amount differs from what was charged.
    AmountMismatch { expected: i64, reported: Decimal },
    Apply {
        transition: Transition,
        update: Option<PaymentUpdate>,
    },
}

/// Decide how `event` changes a payment currently in `current`.
///
/// Pure: the same inputs always yield the same decision, so it can run both
/// inside the store's transaction and again on the state it saw.
pub fn plan(current: &PaymentRecord, event: &GatewayEvent, now: DateTime<Utc>) -> Decision {
    let payment = &current.payment;

    if payment.method == PaymentMethod::Paypal {
        return Decision::ManualReview;
    }
    if let Some(reported) = event.gross_amount {
        if reported != Decimal::from(payment.amount_idr) {
            return Decision::AmountMismatch {
                expected: payment.amount_idr,
                reported,
            };
        }
    }
    if payment.status == event.status
        && payment.fraud_status == event.fraud_status
        && event.status_code.is_some()
        && payment.last_status_code == event.status_code
    {
        return Decision::Duplicate;
    }

    let from = current.registration_status;
    let transition = transition(from, PaymentEvent::classify(event.status, event.fraud_status));
    let update_to = |registration_status: RegistrationStatus| PaymentUpdate {
        status: event.status,
        fraud_status: event.fraud_status,
        payment_type: event.payment_type.clone(),
        gateway_transaction_id: event.transaction_id.clone(),
        status_code: event.status_code.clone(),
        paid_at: (registration_status == RegistrationStatus::Paid).then_some(now),
        registration_status,
    };

    let update = match transition {
        Transition::Advance(next) => Some(update_to(next)),
        Transition::Hold if from == RegistrationStatus::Pending => Some(update_to(from)),
        Transition::Hold | Transition::Ignore(_) | Transition::Invalid => None,
    };
    Decision::Apply { transition, update }
}

/// Result of running an event through [`apply_event`].
#[derive(Debug, Clone)]
pub struct Applied {
    pub before: PaymentRecord,
    pub decision: Decision,
    pub written: Option<PaymentUpdate>,
}

impl Applied {
    pub fn registration_status(&self) -> RegistrationStatus {
        self.written
            .as_ref()
            .map_or(self.before.registration_status, |u| u.registration_status)
    }

    pub fn payment_status(&self) -> TransactionStatus {
        self.written
            .as_ref()
            .map_or(self.before.payment.status, |u| u.status)
    }
}

/// Lock the payment for `order_id` and apply `event` to it.
///
/// Returns `None` when no payment has this order id.
pub async fn apply_event(
    store: &dyn RegistrationStore,
    order_id: &str,
    event: &GatewayEvent,
    now: DateTime<Utc>,
) -> Result<Option<Applied>, StoreError> {
    let decide = |current: &PaymentRecord| match plan(current, event, now) {
        Decision::Apply { update, .. } => update,
        _ => None,
    };
    let Some(reconciled) = store.reconcile_payment(order_id, &decide).await? else {
        return Ok(None);
    };
    let decision = plan(&reconciled.before, event, now);
    Ok(Some(Applied {
        before: reconciled.before,
        decision,
        written: reconciled.applied,
    }))
}

/// Acknowledgement returned to the gateway.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookOutcome {
    pub accepted: bool,
    pub order_id: String,
    pub transaction_status: String,
    pub registration_status: Option<RegistrationStatus>,
    pub payment_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl WebhookOutcome {
    fn rejected(notification: &WebhookNotification, reason: &str) -> Self {
        Self {
            accepted: false,
            order_id: notification.order_id.clone(),
            transaction_status: notification.transaction_status.clone(),
            registration_status: None,
            payment_id: None,
            reason: Some(reason.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct WebhookProcessor {
    store: Arc<dyn RegistrationStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl WebhookProcessor {
    pub fn new(store: Arc<dyn RegistrationStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    /// Process one notification.
    ///
    /// Business outcomes (bad signature, unknown order, impossible
    /// transition) are reported in the returned outcome. Only storage
    /// failures are errors, so the gateway retries those.
    #[instrument(
        skip(self, notification),
        fields(order_id = %notification.order_id, transaction_status = %notification.transaction_status)
    )]
    pub async fn process(
        &self,
        notification: &WebhookNotification,
    ) -> Result<WebhookOutcome, RegistrationError> {
        if !self.gateway.verify_signature(notification) {
            warn!(
                status_code = %notification.status_code,
                "Notification signature mismatch"
            );
            WEBHOOKS_TOTAL.with_label_values(&["signature_mismatch"]).inc();
            return Ok(WebhookOutcome::rejected(notification, "SIGNATURE_MISMATCH"));
        }

        let event = match GatewayEvent::from_notification(notification) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Notification carries an unknown status");
                WEBHOOKS_TOTAL.with_label_values(&["unknown_status"]).inc();
                return Ok(WebhookOutcome::rejected(notification, "UNKNOWN_STATUS"));
            }
        };

        let applied = match apply_event(&*self.store, &notification.order_id, &event, Utc::now())
            .await
        {
            Ok(Some(applied)) => applied,
            Ok(None) => {
                warn!("Notification for unknown order");
                WEBHOOKS_TOTAL.with_label_values(&["order_not_found"]).inc();
                return Ok(WebhookOutcome::rejected(notification, "ORDER_NOT_FOUND"));
            }
            Err(StoreError::EmailTaken) => {
                error!("Late settlement conflicts with a newer registration for the same email");
                WEBHOOKS_TOTAL.with_label_values(&["email_conflict"]).inc();
                return Ok(WebhookOutcome::rejected(notification, "EMAIL_CONFLICT"));
            }
            Err(e) => {
                error!(error = %e, "Failed to reconcile notification");
                return Err(e.into());
            }
        };

        Ok(self.outcome(notification, &applied))
    }

    /// Acknowledge a JSON body that is not a notification.
    pub fn malformed(&self, body: &serde_json::Value, error: &serde_json::Error) -> WebhookOutcome {
        let field = |name: &str| {
            body.get(name)
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let outcome = WebhookOutcome {
            accepted: false,
            order_id: field("order_id"),
            transaction_status: field("transaction_status"),
            registration_status: None,
            payment_id: None,
            reason: Some("MALFORMED_NOTIFICATION".to_string()),
        };
        warn!(
            order_id = %outcome.order_id,
            error = %error,
            "Malformed notification acknowledged"
        );
        WEBHOOKS_TOTAL.with_label_values(&["malformed"]).inc();
        outcome
    }

    fn outcome(&self, notification: &WebhookNotification, applied: &Applied) -> WebhookOutcome {
        let before = applied.before.registration_status;
        let (accepted, label, reason) = match &applied.decision {
            Decision::Duplicate => {
                info!("Duplicate notification ignored");
                (true, "duplicate", Some("DUPLICATE".to_string()))
            }
            Decision::ManualReview => {
                info!("Manual-transfer payment left for admin review");
                (true, "manual_review", Some("MANUAL_REVIEW".to_string()))
            }
            Decision::AmountMismatch { expected, reported } => {
                warn!(expected, reported = %reported, "Notification amount mismatch");
                (false, "amount_mismatch", Some("AMOUNT_MISMATCH".to_string()))
            }
            Decision::Apply {
                transition: Transition::Invalid,
                ..
            } => {
                warn!(registration_status = %before, "Invalid transition ignored");
                (false, "invalid_transition", Some("INVALID_TRANSITION".to_string()))
            }
            Decision::Apply {
                transition: Transition::Ignore(why),
                ..
            } => {
                info!(registration_status = %before, reason = why, "Notification ignored");
                (true, "ignored", Some((*why).to_string()))
            }
            Decision::Apply { .. } => {
                info!(
                    from = %before,
                    to = %applied.registration_status(),
                    payment_status = %applied.payment_status(),
                    "Notification applied"
                );
                (true, "applied", None)
            }
        };
        WEBHOOKS_TOTAL.with_label_values(&[label]).inc();

        WebhookOutcome {
            accepted,
            order_id: notification.order_id.clone(),
            transaction_status: notification.transaction_status.clone(),
            registration_status: Some(applied.registration_status()),
            payment_id: Some(applied.before.payment.id),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Payment;

    fn record(
        registration_status: RegistrationStatus,
        status: TransactionStatus,
        fraud_status: Option<FraudStatus>,
        last_status_code: Option<&str>,
    ) -> PaymentRecord {
        let now = Utc::now();
        PaymentRecord {
            payment: Payment {
                id: 1,
                registration_id: 1,
                order_id: "RYLS0001ABCDEFGH".into(),
                amount_idr: 225_000,
                amount_usd: Decimal::from(15),
                fx_rate: Decimal::from(15_000),
                quoted_at: now,
                method: PaymentMethod::Midtrans,
                status,
                fraud_status,
                payment_proof_file_id: None,
                gateway_transaction_id: None,
                payment_type: None,
                snap_token: Some("token".into()),
                redirect_url: None,
                last_status_code: last_status_code.map(str::to_string),
                paid_at: None,
                created_at: now,
                updated_at: now,
            },
            registration_status,
        }
    }

    fn event(status: TransactionStatus, fraud: Option<FraudStatus>, code: &str) -> GatewayEvent {
        GatewayEvent {
            fraud_status: fraud,
            status_code: Some(code.into()),
            gross_amount: Some(Decimal::from(225_000)),
            ..GatewayEvent::new(status)
        }
    }

    #[test]
    fn settlement_pays_a_pending_registration() {
        let now = Utc::now();
        let current = record(RegistrationStatus::Pending, TransactionStatus::Pending, None, Some("201"));
        let decision = plan(
            &current,
            &event(TransactionStatus::Settlement, Some(FraudStatus::Accept), "200"),
            now,
        );
        let Decision::Apply {
            transition: Transition::Advance(RegistrationStatus::Paid),
            update: Some(update),
        } = decision
        else {
            panic!("unexpected decision {decision:?}");
        };
        assert_eq!(update.status, TransactionStatus::Settlement);
        assert_eq!(update.paid_at, Some(now));
    }

    #[test]
    fn repeated_notification_is_a_duplicate() {
        let current = record(
            RegistrationStatus::Paid,
            TransactionStatus::Settlement,
            Some(FraudStatus::Accept),
            Some("200"),
        );
        let decision = plan(
            &current,
            &event(TransactionStatus::Settlement, Some(FraudStatus::Accept), "200"),
            Utc::now(),
        );
        assert_eq!(decision, Decision::Duplicate);
    }

    #[test]
    fn pending_after_settlement_changes_nothing() {
        let current = record(
            RegistrationStatus::Paid,
            TransactionStatus::Settlement,
            Some(FraudStatus::Accept),
            Some("200"),
        );
        let decision = plan(&current, &event(TransactionStatus::Pending, None, "201"), Utc::now());
        assert!(matches!(
            decision,
            Decision::Apply {
                transition: Transition::Ignore(_),
                update: None
            }
        ));
    }

    #[test]
    fn challenge_holds_and_records_the_capture() {
        let current = record(RegistrationStatus::Pending, TransactionStatus::Pending, None, None);
        let decision = plan(
            &current,
            &event(TransactionStatus::Capture, Some(FraudStatus::Challenge), "201"),
            Utc::now(),
        );
        let Decision::Apply {
            transition: Transition::Hold,
            update: Some(update),
        } = decision
        else {
            panic!("unexpected decision {decision:?}");
        };
        assert_eq!(update.registration_status, RegistrationStatus::Pending);
        assert_eq!(update.paid_at, None);
    }

    #[test]
    fn closed_registrations_do_not_record_holds() {
        let current = record(RegistrationStatus::Expired, TransactionStatus::Expire, None, Some("407"));
        let decision = plan(&current, &event(TransactionStatus::Deny, None, "202"), Utc::now());
        assert_eq!(
            decision,
            Decision::Apply {
                transition: Transition::Hold,
                update: None
            }
        );
    }

    #[test]
    fn late_settlement_reopens_expired() {
        let current = record(RegistrationStatus::Expired, TransactionStatus::Expire, None, Some("407"));
        let decision = plan(
            &current,
            &event(TransactionStatus::Settlement, None, "200"),
            Utc::now(),
        );
        assert!(matches!(
            decision,
            Decision::Apply {
                transition: Transition::Advance(RegistrationStatus::Paid),
                update: Some(_)
            }
        ));
    }

    #[test]
    fn manual_transfers_are_left_alone() {
        let mut current = record(RegistrationStatus::Pending, TransactionStatus::Pending, None, None);
        current.payment.method = PaymentMethod::Paypal;
        let decision = plan(&current, &event(TransactionStatus::Settlement, None, "200"), Utc::now());
        assert_eq!(decision, Decision::ManualReview);
    }

    #[test]
    fn amount_must_match_the_charge() {
        let current = record(RegistrationStatus::Pending, TransactionStatus::Pending, None, None);
        let mut tampered = event(TransactionStatus::Settlement, None, "200");
        tampered.gross_amount = Some(Decimal::from(1_000));
        assert!(matches!(
            plan(&current, &tampered, Utc::now()),
            Decision::AmountMismatch { expected: 225_000, .. }
        ));
    }

    #[test]
    fn notification_amounts_with_decimals_parse() {
        let notification = WebhookNotification {
            order_id: "RYLS0001ABCDEFGH".into(),
            transaction_status: "settlement".into(),
            status_code: "200".into(),
            gross_amount: "225000.00".into(),
            signature_key: String::new(),
            fraud_status: Some("accept".into()),
            payment_type: Some("qris".into()),
            transaction_id: None,
            transaction_time: None,
            settlement_time: None,
            status_message: None,
        };
        let event = GatewayEvent::from_notification(&notification).unwrap();
        assert_eq!(event.gross_amount, Some(Decimal::from(225_000)));
        assert_eq!(event.fraud_status, Some(FraudStatus::Accept));

        let unknown = WebhookNotification {
            transaction_status: "authorize".into(),
            ..notification
        };
        assert!(GatewayEvent::from_notification(&unknown).is_err());
    }
}
