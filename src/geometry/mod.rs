//! Geometry helpers for mesh cells: measures, diameters and linear gradients.

pub mod metrics;
