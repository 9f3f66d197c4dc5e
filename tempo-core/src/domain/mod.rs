//! Domain models shared by every transport.

pub mod cluster;
pub mod node;
