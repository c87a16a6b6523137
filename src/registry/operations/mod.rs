//! Registry operations that need no upload session

pub mod blob_operations;

pub use blob_operations::{BlobOperations, BlobStream, Descriptor};
