pub mod blob;
pub mod cli;
pub mod config;
pub mod context;
pub mod logging;
pub mod pipeline;
pub mod publish;

pub use blob::{BlobStore, LocalBlobStore, MemoryBlobStore};
pub use config::PipelineConfig;
pub use context::{build_context, ProjectContext};
pub use pipeline::{Pipeline, PipelineReport, Services};
pub use publish::{NotionPublisher, PagePublisher};
