//! # Domain Module
//!
//! Core types for the Merkle Set: nodes, the tree arena and errors.

pub mod errors;
pub mod node;
pub mod tree;

pub use errors::*;
pub use node::*;
pub use tree::*;
