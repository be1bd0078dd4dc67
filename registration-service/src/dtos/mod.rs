//! Request and response bodies of the HTTP surface.

pub mod payment;
pub mod registration;
pub mod upload;
pub mod validation;

pub use payment::PaymentStatusView;
pub use registration::{
    CreateTransactionRequest, DeleteResponse, EmailCheckResponse, FullyFundedRequest,
    PaymentView, RegistrationQuery, RegistrationView, SelfFundedRequest, SubmissionResult,
    SubmissionView, UpdateStatusRequest,
};
pub use upload::{FileDeleteResponse, FileListQuery, FileView};
