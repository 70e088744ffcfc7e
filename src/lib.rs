pub mod errors;
pub mod file;
pub mod load;
pub mod metadata;
pub mod pipeline;
pub mod registration;
pub mod save;
pub mod transform;
pub mod volume;

pub use load::load_volume;
pub use metadata::*;
pub use pipeline::{
    PipelineConfig, PipelineError, PipelineOutput, PipelinePaths, RegistrationPipeline,
    reslice,
};
pub use save::save_volume;
pub use transform::*;
pub use volume::Volume;
