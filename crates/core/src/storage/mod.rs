pub mod blob;

pub use blob::{object_key, BlobStore, FilesystemBlobStore, ObjectStoreBlobStore};
