pub mod loader;

pub use loader::{LoadMode, insert, insert_one, insert_or_update, upsert_one};
