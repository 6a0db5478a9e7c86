// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Functional tests for leader election and annotation extraction.
//!
//! These tests drive several electors against one in-memory lock store and
//! run the full parser registry over Ingress fixtures, WITHOUT requiring a
//! live Kubernetes cluster.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_concurrent_claims_elect_one_leader
//! ```
//!
//! ## Test Categories
//!
//! - **Election scenarios**: races, takeovers, leader lookup and the
//!   background election loop
//! - **Extraction scenarios**: realistic annotation sets resolved against
//!   fixture secrets

#[path = "../common/mod.rs"]
mod common;

mod election_scenarios;
