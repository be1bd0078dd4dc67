//! Domain models for registration-service.

mod enums;
mod file_upload;
mod payment;
mod registration;
pub mod status;

pub use enums::{
    DiscoverSource, EssayTopic, FileKind, Gender, PaymentMethod, ScholarshipType, UnknownVariant,
};
pub use file_upload::{
    CleanupReport, FileRecord, FileStatistics, FileUrls, KindCount, NewUpload,
};
pub use payment::{NewPayment, Payment, PaymentRecord, PaymentUpdate, Reconciled};
pub use registration::{
    age_on, Applicant, Application, FullyFundedSubmission, Page, Paging, PaymentChoice,
    Registration, RegistrationDetail, RegistrationFilter, SelfFundedSubmission, Sort, SortField,
    SortOrder, Submission, SubmissionDetails,
};
pub use status::{
    admin_correction, transition, transition_table, AdminCorrection, FraudDecision, FraudStatus,
    PaymentEvent, RegistrationStatus, Transition, TransactionStatus,
};
