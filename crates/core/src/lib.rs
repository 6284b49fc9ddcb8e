pub mod activity;
pub mod audit;
pub mod banking;
pub mod config;
pub mod dialogs;
pub mod errors;

pub use activity::Activity;
pub use audit::{
    AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink, TracingAuditSink,
};
pub use banking::{banking_registry, AccountLedger, RandomLedger, TransferRequest};
pub use dialogs::{
    ConversationId, ConversationStore, DialogRegistry, DialogStack, ExtractedEntities,
    Orchestrator, OrchestratorSettings, Recognition, Recognizer, TurnError, TurnInput, TurnKind,
    TurnOutcome, TurnStatus,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
