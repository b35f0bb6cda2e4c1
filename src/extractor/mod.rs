pub mod hybrid;
pub mod manifest;
pub mod models;
pub mod traits;

pub use hybrid::HybridExtractor;
pub use manifest::ManifestExtractor;
pub use models::{Caption, CaptionTransform, MediaInfo, Stream, StreamPart};
pub use traits::Extractor;
