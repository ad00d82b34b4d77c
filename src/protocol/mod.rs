//! Protocol module

pub mod sync;
