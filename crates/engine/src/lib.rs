pub mod config;
pub mod controller;
pub mod error;
pub mod registry;
pub mod stream;

pub use config::{SyncConfig, TableSyncConfig};
pub use controller::{SyncPhase, SyncStatus, TableSyncController, TableSyncHandle};
pub use error::EngineError;
pub use registry::{RegistryHandle, SyncRegistry};
pub use stream::{ShapeStream, ShapeSubscriber, SubscribeOptions, SubscriptionError};
