pub mod connection;
pub mod executor;
pub mod fixtures;
pub mod migrations;

pub use connection::{connect, connect_read_only, connect_with_settings, DbPool};
pub use executor::SqliteExecutionProvider;
pub use fixtures::{DemoDataset, FixtureError, SeedResult};
