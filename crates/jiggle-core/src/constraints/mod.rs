//! Per-particle position constraints, applied parent-before-child.
//!
//! Each function reads an already-solved parent by value and corrects the
//! child in place. None of them touch another chain's particles.
pub mod freeze;
pub mod length;
pub mod shape;
