//! Digests, media types, manifest parsing, and wire-input validation.

mod digest;
mod manifest;
mod media_type;
mod validate;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use digest::*;
pub use manifest::*;
pub use media_type::*;
pub use validate::*;
