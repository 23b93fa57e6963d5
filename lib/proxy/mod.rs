//! The pull-through proxy: upstream client, cache ledger, and engine.

mod cache;
mod pull;
mod upstream;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use cache::*;
pub use pull::*;
pub use upstream::*;
