pub mod packaging;
pub mod pipeline;

pub use packaging::{package, PackagedOutput};
pub use pipeline::{PipelineComponents, PipelineOrchestrator};
