//! Content-addressed blob storage, manifest persistence, and image
//! metadata projections.

mod blob;
mod image;
mod layout;
mod manifest;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use blob::*;
pub use image::*;
pub use layout::*;
pub use manifest::*;
