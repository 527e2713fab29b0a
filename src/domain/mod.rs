//! Core domain models

pub mod job;
