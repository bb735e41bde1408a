//! Overlap module: remote-copy links of shared entities and the rules used to
//! fuse values arriving over those links.
//!
//! This module re-exports the [`overlap`] and [`delta`] submodules.

pub mod delta;
pub mod overlap;
