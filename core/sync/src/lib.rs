//! GeoSync Sync Engine
//!
//! Keeps a local replica of several server-owned collections up to date:
//! - Participants, one per collection, owning their tables and cursors
//! - Batched GraphQL rounds, one page per participant per round
//! - Single-flight sessions that callers join instead of duplicating
//! - Background scheduling with exponential backoff

pub mod config;
pub mod coordinator;
pub mod participant;
pub mod participants;
pub mod query;
pub mod registry;
pub mod response;
pub mod retry;
pub mod scheduler;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-export main types
pub use config::{GeoSyncConfig, SyncSettings};
pub use coordinator::{SyncCoordinator, SyncOutcome, SyncStats};
pub use participant::{Participant, ParticipantFailure, SyncResult};
pub use participants::{BeaconParticipant, GeofenceParticipant, PagedParticipant, SyncEntity};
pub use query::{BatchedQuery, SyncQuery, SyncRequest};
pub use registry::ParticipantRegistry;
pub use response::{DocumentError, GraphQLResponse, PageInfo};
pub use retry::RetryConfig;
pub use scheduler::{JobOutcome, SyncJob, SyncMode, SyncScheduler, SyncSchedulerHandle};
pub use transport::{HttpTransport, Transport, TransportOutcome};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        // Verify all main types are accessible
        let _config = GeoSyncConfig::default();
        let _retry_config = RetryConfig::default();
        let _registry = ParticipantRegistry::new();
        let _stats = SyncStats::default();
    }
}
