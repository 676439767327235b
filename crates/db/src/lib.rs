pub mod connection;
pub mod contract;
pub mod migrations;
pub mod processor;
pub mod replication;
mod store;

pub use connection::{connect, connect_from_config, connect_with_settings, DbPool};
pub use contract::ContractStateProcessor;
pub use migrations::{run_pending, MIGRATOR};
pub use processor::{
    DiscountPreview, FieldColumnInput, GroupInput, MarginRequest, QuoteStateProcessor,
    StoreStateOutcome, StoreStateRequest,
};
pub use replication::{
    CopyingFileReplicator, FileReplicator, ReplicationOptions, ReplicationReport,
    SnapshotReplicator,
};
pub use store::ActiveSnapshot;
