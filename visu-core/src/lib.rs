pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod ipc;
pub mod lookup;
pub mod models;
pub mod sessions;
pub mod store;
pub mod views;
pub mod window;

pub use cache::QueryCache;
pub use config::VisuConfig;
pub use error::VisuError;
pub use lookup::{LookupField, SessionTimeline};
pub use models::Event;
pub use sessions::{format_duration, reconstruct, SessionSummary};
pub use store::{create_store, EventStore, MemoryEventStore, PgEventStore, QueryResult, StoreError};
pub use window::TimeWindow;
