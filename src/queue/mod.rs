pub mod cache;
pub mod dispatcher;
pub mod events;
pub mod manager;
pub mod orchestrator;
pub mod task;

pub use cache::{ExtractorCache, DEFAULT_CACHE_CAPACITY};
pub use events::{ChannelNotifier, DataType, DownloadResponse, Notifier, DOWNLOAD_UPDATE_EVENT};
pub use manager::{DownloadRequest, TaskPlan, WorkQueue};
pub use task::{format_speed, DownloadTask, PageInfo, Part, PartState, TaskStatus};
