//! Upload module for single-shot and chunked blob uploads

pub mod chunked;
pub mod range;
pub mod session;
pub mod source;

pub use chunked::ChunkedUploader;
pub use range::{ByteRange, UploadPlan};
pub use session::{SessionInitiator, UploadSession};
pub use source::{BlobSource, FileSource, MemorySource};
