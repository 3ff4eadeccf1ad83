//! Core data types for the control plane

pub mod metric;
pub mod moderation;
pub mod token;
