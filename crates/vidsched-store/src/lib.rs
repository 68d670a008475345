pub mod assets;
pub mod config;
pub mod documents;
pub mod error;
pub mod platform;

pub use assets::{Asset, AssetReader, AssetStore, ByteRange, PendingAsset};
pub use documents::{DocumentKind, DocumentStore};
pub use error::{DataRootError, StoreError};
