pub mod currency;
pub mod database;
pub mod export;
pub mod file_store;
pub mod identifiers;
pub mod metrics;
pub mod midtrans;
pub mod registration;
pub mod repository;
pub mod sweep;
pub mod webhook;

pub use currency::{CurrencyOracle, HttpCurrencyOracle, StaticRateOracle};
pub use database::Database;
pub use file_store::{DiskFileStore, FileStore};
pub use metrics::{get_metrics, init_metrics};
pub use midtrans::{MidtransClient, PaymentGateway, WebhookNotification};
pub use registration::RegistrationService;
pub use repository::RegistrationStore;
pub use sweep::ExpirySweeper;
pub use webhook::WebhookProcessor;
