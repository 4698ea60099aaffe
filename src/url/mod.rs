//! URL handling module for newscover
//!
//! Pure string functions: normalization, host and path relationships between
//! a schedule's index URL and a discovered link, link resolution and hop depth.

mod normalize;
mod relation;

pub use normalize::normalize;
pub use relation::{
    depth, file_extension, fill_url, is_absolute_path, is_path, is_same_host, is_sub_url,
};
