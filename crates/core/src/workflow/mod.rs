pub mod dag;
pub mod resource;

pub use dag::{Adjacency, DagError, Position, PositionKind, WorkflowDag, MAX_RANK};
pub use resource::ResourceIndex;
