pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod ledger;
pub mod policy;
pub mod ports;
pub mod routing;
pub mod store;
pub mod token;

pub use audit::{AuditContext, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use domain::approval::{ApprovalAction, ApprovalStatus, ApprovalStep, StepId};
pub use domain::level::ApprovalLevelConfig;
pub use domain::request::{
    ApprovalRequest, ArtifactRef, NewApprovalRequest, RequestId, RequestUpdate, RoutingState,
};
pub use errors::{
    ActionReply, InterfaceError, RoutingError, SideEffectError, StoreError,
};
pub use ledger::StepLedger;
pub use policy::{save_level_config, validate_ladder, LadderError, LevelPolicy, PolicyError, ResolvedPolicy};
pub use ports::{ArtifactMover, LevelConfigStore, Notifier, RequestStore, StepStore};
pub use routing::{
    ActionOutcome, ActionResponse, ApprovalStatusView, InitializedApproval, RoutingEngine,
    Submission,
};
pub use token::{TokenCodec, TokenError, TokenFormat, TokenVerification};
