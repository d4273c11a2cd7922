//! Core domain types
//!
//! This module contains the structures the backend works with while a build
//! is in flight. They are shared between the status client (which serializes
//! snapshots of them) and the worker (which mutates them).

pub mod event;
pub mod job;
pub mod vm;
