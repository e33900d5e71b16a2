//! Common types shared by the bastion crates.
//!
//! - [`ids`]: identifier newtypes for model entities
//! - [`warnings`]: the warning accumulator returned by batch operations

pub mod ids;
pub mod warnings;

pub use ids::{BackendId, ContainerId, DomainId, ProjectId, UserId};
pub use warnings::{Warning, Warnings};
