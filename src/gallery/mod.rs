//! Gallery link extraction and remote resolution.

/// Remote JSON API client
pub mod api;
/// Link extraction from message text
pub mod extractor;
/// Page-token and metadata resolution
pub mod resolver;
/// Identifiers and metadata records
pub mod types;

pub use api::{ApiEntry, ApiError, EhApiClient, EntryError, GalleryApi, DEFAULT_API_ENDPOINT};
pub use extractor::{LinkExtractor, BATCH_CEILING};
pub use resolver::GalleryResolver;
pub use types::{ExtractionResult, GalleryMetadata, GalleryRef, GalleryToken, PageRef, Torrent};
