//! Face identity matching and person suggestions for a local photo library.
//!
//! Photos are ingested from a [`scanner::MediaSource`] and recognised across
//! renames and moves by content hash. Faces are detected and embedded, matched
//! against every stored face, and proposed to the user as suggestions. An
//! accepted suggestion links the photo to a person.

pub mod config;
pub mod db;
pub mod error;
pub mod faces;
pub mod lifecycle;
pub mod logging;
pub mod pipeline;
pub mod scanner;
pub mod tasks;
pub mod watch;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
