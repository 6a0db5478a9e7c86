//! Shared fixtures for the test crates.

#![allow(dead_code)]

pub mod fixtures;
