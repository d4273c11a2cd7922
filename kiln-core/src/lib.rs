//! Kiln Core
//!
//! Core types shared by the Kiln build-farm backend.
//!
//! This crate contains:
//! - Domain types: build jobs, statuses, VM handles and lifecycle events
//! - DTOs: payloads exchanged with the status service (frontend)

pub mod domain;
pub mod dto;
