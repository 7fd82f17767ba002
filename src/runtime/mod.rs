//! Runtime adapters and the operations facade.

pub mod api;
pub mod tokio_spawner;

pub use api::{
    PipelineCounts, PipelineService, PipelineStatus, PublishNowResponse, ScheduleBatchResponse,
    ScheduleItem,
};
pub use tokio_spawner::TokioSpawner;
