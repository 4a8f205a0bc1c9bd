#![forbid(unsafe_code)]

pub mod memory;

pub use memory::{DemoSeed, MemoryStore, Room};

#[cfg(test)]
mod memory_tests;
