//! Retry policies for backend calls.

pub mod retry;
