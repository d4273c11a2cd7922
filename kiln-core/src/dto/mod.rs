//! Data Transfer Objects for inter-service communication
//!
//! DTOs are the flat, wire-friendly shapes exchanged with the frontend and
//! read from the dispatch queue.

pub mod build;
