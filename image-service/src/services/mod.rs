pub mod image_fetcher;
pub mod metrics;
pub mod providers;

pub use image_fetcher::{FetchError, FetchedImage, ImageFetcher};
pub use providers::{ImageProvider, ProviderError};
