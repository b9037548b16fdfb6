pub mod blob;
mod error;
mod pipeline;
pub mod store;

pub use blob::{BlobStore, LocalBlobStore};
pub use error::PipelineError;
pub use pipeline::{Attachment, ConversationPipeline, EventStream, StreamEvent, TurnInput};
