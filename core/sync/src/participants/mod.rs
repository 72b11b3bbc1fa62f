//! Concrete participants: one per synced entity collection.

pub mod beacons;
pub mod geofences;
pub mod paged;

pub use beacons::BeaconParticipant;
pub use geofences::GeofenceParticipant;
pub use paged::{PagedParticipant, SyncEntity, DEFAULT_PAGE_SIZE, ORDER_UPDATED_AT_ASC};
