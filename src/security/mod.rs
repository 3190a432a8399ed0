//! Security helpers for package handling
//!
//! - **path**: containment checks that keep every package file operation
//!   inside its storage root, plus slug validation so on-disk locations are
//!   only ever derived from vetted identifiers.

pub mod path;

pub use path::{contains_traversal_pattern, validate_path_in_root, validate_slug, SafePath};
