// file: src/storage/mod.rs
// description: on-disk product catalog, asset path resolution and image downloads
// reference: internal module structure

pub mod catalog;
pub mod download;
pub mod paths;

pub use catalog::{CatalogLoad, ProductCatalog, UpsertOutcome};
pub use download::AssetDownloader;
pub use paths::{AssetLocation, AssetPathResolver, DATA_MOUNT, OUTPUTS_MOUNT};
