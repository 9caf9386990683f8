//! The sync engine: source adapters, the webhook side channel, and the
//! run orchestrator/scheduler.

pub mod adapters;
pub mod scheduler;

pub use adapters::{
    handle_subscription_event, sync_source, SourceSyncReport, SubscriptionAction,
    SubscriptionEvent, SyncError,
};
pub use scheduler::{start_scheduler, RunReport, SchedulerHandle, SyncEngine, SyncStatus};
