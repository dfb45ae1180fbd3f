//! Durable storage for generated images.
//!
//! - [`blob`]: the Blob Store seam plus S3 and local-filesystem backends.
//! - [`fetch`]: downloading transient result URLs.
//! - [`persist`]: the persistence adapter that moves a transient result
//!   into durable storage, with a fast single-shot path and a retrying
//!   path for late callbacks.

pub mod blob;
pub mod fetch;
pub mod persist;

pub use blob::{BlobStore, BlobStoreError, LocalBlobStore, S3BlobStore, StoredBlob};
pub use fetch::{FetchError, FetchedImage, HttpImageFetcher, ImageFetcher};
pub use persist::{BlobDestination, BlobPersister, PersistConfig};
