//! JSON import and export of managed objects
//!
//! # Architecture
//!
//! - `codec.rs` - Building objects from JSON documents and exporting them
//! - `converter.rs` - JSON to stored value conversion, both directions
//! - `error.rs` - Domain-specific errors

pub mod codec;
mod converter;
mod error;

pub use codec::{
    class_to_json, create_from_json_stream, create_or_update_from_json, detach_json, export_class, export_object, to_json,
};
pub use converter::{JsonToValueConverter, ValueToJsonConverter};
pub use error::{JsonError, JsonResult};
