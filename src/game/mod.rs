//! Game module
//!
//! Players connected through the proxy and the registry that indexes them.

pub mod player;
