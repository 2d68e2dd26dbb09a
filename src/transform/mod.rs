/// Transform Module - Data-Oriented Programming (DOP) style
///
/// - transform_data.rs: Pure data structures with NO methods
/// - transform_operations.rs: Pure functions that operate on data
///

pub mod transform_data;
pub mod transform_operations;

pub use transform_data::{BonePose, LatticeTransformPair};
pub use transform_operations::{lattice_transform_pair, skinned_local_to_world};
