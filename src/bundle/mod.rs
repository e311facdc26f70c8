pub mod archive;
pub mod document;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod loader;
