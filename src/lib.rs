pub mod cancel;
pub mod config;
pub mod descriptor;
pub mod digest;
pub mod error;
pub mod image;
pub mod inspect;
pub mod memory;
pub mod platform;
pub mod prune;
pub mod reference;
pub mod repository;
pub mod resolve;
pub mod store;
pub mod tag;
pub mod usage;
pub mod walk;

#[cfg(test)]
mod test;

pub use descriptor::Descriptor;
pub use digest::Digest;
pub use error::{Error, Result};
