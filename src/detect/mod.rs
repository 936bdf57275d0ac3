mod backend;
pub mod backends;
mod result;

pub use backend::{covers_label, DetectorBackend};
pub use backends::{select_backend, DetectorSettings, HeuristicBackend, ScriptedBackend};
pub use result::{BoundingBox, Detection};
