//! Registration payment lifecycle.
//!
//! Gateway notifications are first classified into a [`PaymentEvent`]; the
//! event is then applied to the registration's current
//! [`RegistrationStatus`] through [`transition`]. The full table is
//! available from [`transition_table`] so every cell can be checked.

use super::enums::text_enum;

text_enum! {
    /// Lifecycle status of a registration.
    pub enum RegistrationStatus {
        Pending => "PENDING",
        Paid => "PAID",
        Failed => "FAILED",
        Expired => "EXPIRED",
    }
}

text_enum! {
    /// Transaction status as reported by the gateway.
    pub enum TransactionStatus {
        Pending => "pending",
        Capture => "capture",
        Settlement => "settlement",
        Deny => "deny",
        Cancel => "cancel",
        Expire => "expire",
        Refund => "refund",
        Chargeback => "chargeback",
    }
}

impl TransactionStatus {
    /// Registration status a payment in this state corresponds to.
    pub fn registration_status(self) -> RegistrationStatus {
        match self {
            TransactionStatus::Settlement | TransactionStatus::Capture => RegistrationStatus::Paid,
            TransactionStatus::Pending => RegistrationStatus::Pending,
            TransactionStatus::Deny | TransactionStatus::Cancel => RegistrationStatus::Failed,
            TransactionStatus::Expire => RegistrationStatus::Expired,
            TransactionStatus::Refund => RegistrationStatus::Paid,
            TransactionStatus::Chargeback => RegistrationStatus::Failed,
        }
    }
}

text_enum! {
    /// Advisory fraud verdict attached to card captures.
    pub enum FraudStatus {
        Accept => "accept",
        Challenge => "challenge",
        Deny => "deny",
    }
}

text_enum! {
    pub enum FraudDecision {
        Accepted => "ACCEPTED",
        ReviewRequired => "REVIEW_REQUIRED",
        Rejected => "REJECTED",
    }
}

impl FraudStatus {
    pub fn decision(self) -> FraudDecision {
        match self {
            FraudStatus::Accept => FraudDecision::Accepted,
            FraudStatus::Challenge => FraudDecision::ReviewRequired,
            FraudStatus::Deny => FraudDecision::Rejected,
        }
    }
}

/// A gateway status reduced to what matters for the registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentEvent {
    /// Funds captured and not flagged.
    Settled,
    /// Captured but held for fraud review.
    UnderReview,
    /// Still waiting for the payer.
    Awaiting,
    /// Denied or cancelled.
    Rejected,
    Expired,
    Refunded,
    Chargeback,
}

impl PaymentEvent {
    pub const ALL: [PaymentEvent; 7] = [
        PaymentEvent::Settled,
        PaymentEvent::UnderReview,
        PaymentEvent::Awaiting,
        PaymentEvent::Rejected,
        PaymentEvent::Expired,
        PaymentEvent::Refunded,
        PaymentEvent::Chargeback,
    ];

    pub fn classify(status: TransactionStatus, fraud: Option<FraudStatus>) -> Self {
        match status {
            TransactionStatus::Settlement | TransactionStatus::Capture => {
                match fraud.map(FraudStatus::decision) {
                    None | Some(FraudDecision::Accepted) => PaymentEvent::Settled,
                    Some(FraudDecision::ReviewRequired) => PaymentEvent::UnderReview,
                    Some(FraudDecision::Rejected) => PaymentEvent::Rejected,
                }
            }
            TransactionStatus::Pending => PaymentEvent::Awaiting,
            TransactionStatus::Deny | TransactionStatus::Cancel => PaymentEvent::Rejected,
            TransactionStatus::Expire => PaymentEvent::Expired,
            TransactionStatus::Refund => PaymentEvent::Refunded,
            TransactionStatus::Chargeback => PaymentEvent::Chargeback,
        }
    }
}

/// Result of applying an event to a registration status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move the registration to a new status.
    Advance(RegistrationStatus),
    /// Registration keeps its status; the payment still records the event.
    Hold,
    /// Nothing changes. The reason is logged.
    Ignore(&'static str),
    /// The event cannot happen from this status.
    Invalid,
}

/// Apply `event` to a registration currently in `from`.
pub fn transition(from: RegistrationStatus, event: PaymentEvent) -> Transition {
    use PaymentEvent as E;
    use RegistrationStatus as S;

    match (from, event) {
        (S::Pending, E::Settled) => Transition::Advance(S::Paid),
        (S::Pending, E::UnderReview | E::Awaiting) => Transition::Hold,
        (S::Pending, E::Rejected | E::Chargeback) => Transition::Advance(S::Failed),
        (S::Pending, E::Expired) => Transition::Advance(S::Expired),
        (S::Pending, E::Refunded) => Transition::Invalid,

        (S::Paid, E::Settled | E::UnderReview | E::Awaiting) => {
            Transition::Ignore("registration already paid")
        }
        (S::Paid, E::Rejected | E::Expired) => Transition::Ignore("paid registration never regresses"),
        (S::Paid, E::Refunded) => Transition::Ignore("refund recorded; refunds are handled offline"),
        (S::Paid, E::Chargeback) => {
            Transition::Ignore("chargeback recorded; chargebacks are handled offline")
        }

        (S::Failed | S::Expired, E::Settled) => Transition::Advance(S::Paid),
        (S::Failed | S::Expired, E::UnderReview | E::Awaiting) => Transition::Hold,
        (S::Failed, E::Rejected) => Transition::Ignore("registration already failed"),
        (S::Expired, E::Rejected) => Transition::Hold,
        (S::Failed | S::Expired, E::Expired) => Transition::Ignore("registration already closed"),
        (S::Failed | S::Expired, E::Chargeback) => Transition::Ignore("registration already closed"),
        (S::Failed | S::Expired, E::Refunded) => Transition::Invalid,
    }
}

/// Every `(status, event)` cell of the state machine.
pub fn transition_table() -> Vec<(RegistrationStatus, PaymentEvent, Transition)> {
    RegistrationStatus::ALL
        .iter()
        .flat_map(|from| {
            PaymentEvent::ALL
                .iter()
                .map(move |event| (*from, *event, transition(*from, *event)))
        })
        .collect()
}

/// Outcome of an administrative status correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCorrection {
    Apply,
    Unchanged,
    Forbidden,
}

/// Corrections an administrator may make outside the gateway flow.
///
/// Pending registrations can be closed either way; failed or expired ones
/// can be marked paid after an offline check. A paid registration is final.
pub fn admin_correction(from: RegistrationStatus, to: RegistrationStatus) -> AdminCorrection {
    use RegistrationStatus as S;

    if from == to {
        return AdminCorrection::Unchanged;
    }
    match (from, to) {
        (S::Pending, S::Paid | S::Failed | S::Expired) => AdminCorrection::Apply,
        (S::Failed | S::Expired, S::Paid) => AdminCorrection::Apply,
        _ => AdminCorrection::Forbidden,
    }
}
