//! Mach-O file format handling.
//!
//! This module provides the on-disk structures of 64-bit Mach-O images and a
//! bounds-checked view for walking their load commands.

mod constants;
mod context;
mod structs;

#[cfg(test)]
pub(crate) mod testing;

pub use constants::*;
pub use context::*;
pub use structs::*;
