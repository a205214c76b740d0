//! Protocol module
//!
//! Semantic model of the player info packets exchanged with clients.

pub mod player_info;
