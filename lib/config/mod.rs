//! Configuration types and validation.

mod defaults;
mod portside;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;
pub use portside::*;
