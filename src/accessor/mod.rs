pub mod object;
pub mod phase;

pub use object::ManagedObject;
pub use phase::{ConstructionPolicy, Phase};
