pub mod config;
pub mod migration;
pub mod realm;

pub use config::{MigrationFn, RealmConfig};
pub use migration::SchemaEditor;
pub use realm::Realm;
