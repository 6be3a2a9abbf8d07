//! # Diagnosis Testing Utils
//!
//! Shared testing utilities for the camera diagnosis scheduler workspace.
//!
//! ## Features
//!
//! - **Test Data Builders**: tasks and cameras with sensible defaults
//! - **Synthetic Frames**: deterministic images that drive algorithms into known states
//! - **Collaborator Mocks**: scripted image sources and recording object stores
//! - **Database Test Containers**: PostgreSQL container with the schema applied
//! - **Integration Test Helpers**: polling until a condition holds
//!
//! ```toml
//! [dev-dependencies]
//! diagnosis-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod containers;
pub mod frames;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use containers::*;
pub use frames::*;
pub use helpers::*;
pub use mocks::*;
