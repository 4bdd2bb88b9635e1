pub mod domain;
pub mod error;
pub mod protocol;
mod serde_ext;
