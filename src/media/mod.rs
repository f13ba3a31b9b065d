mod downloader;
mod error;
mod link;
mod metadata;
mod musicaldown;
mod resolver;
mod tmate;
mod types;
mod utils;

pub use downloader::Downloader;
pub use error::{MediaError, MediaResult};
pub use link::LinkIdentifier;
pub use metadata::MetadataFetcher;
pub use resolver::{Resolver, ResolverVersion};
pub use types::{ContentKind, ContentRef};
pub use utils::shared_client;

#[cfg(test)]
pub use error::ResolveStage;
#[cfg(test)]
pub use types::Discovered;
