pub mod client;
pub mod error;

pub use client::{Fetcher, HttpFetcher};
pub use error::FetchError;
