//! Parameter system: definitions, bounds, transforms, and the ordered
//! registry mapping between optimization space and physical space.

pub mod bounds;
pub mod manager;
pub mod parameter;

pub use bounds::Bounds;
pub use manager::{Feasibility, ParameterManager};
pub use parameter::{Parameter, Transform};
