//! Built-in capability modules.

pub mod fs;

pub use fs::{FsConfig, FsModule};
