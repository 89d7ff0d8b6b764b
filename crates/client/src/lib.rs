//! Client side of mediagate.
//!
//! This crate talks to origins: it probes, fetches and streams remote media,
//! decides what gets cached through the delivery gateway, and resolves
//! catalog sources into media URLs.

pub mod fetch;
pub mod gateway;
pub mod resolver;
#[cfg(test)]
mod testing;

pub use fetch::{FetchResponse, Origin, OriginClient, OriginConfig, OriginStream, UrlError, canonicalize};
pub use gateway::{Delivery, Gateway};
pub use resolver::{DirectResolver, ResolvedMedia, Resolver};
