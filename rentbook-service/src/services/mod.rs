pub mod error;
pub mod gateway;
pub mod initiation;
pub mod ledger;
pub mod manual;
pub mod messaging;
pub mod metrics;
pub mod reconciliation;
pub mod repair;
pub mod scheduler;
pub mod store;

pub use error::PaymentError;
pub use gateway::{
    GatewayError, GatewayOutcome, MobileMoneyClient, MockGateway, MockInitiateMode, PaymentGateway,
};
pub use initiation::{InitiateRequest, InitiateResponse, PaymentInitiationService};
pub use manual::{ManualPaymentRequest, ManualPaymentService};
pub use messaging::{MessagingProvider, MockMessagingProvider, ReceiptNotifier, WhatsAppProvider};
pub use metrics::{get_metrics, init_metrics};
pub use reconciliation::{ApplyResult, ReconciliationEngine, ResultSource};
pub use repair::{DriftReport, LedgerAuditor};
pub use scheduler::VerificationScheduler;
pub use store::{InMemoryLedgerStore, LedgerStore, MongoLedgerStore, StoreError};
