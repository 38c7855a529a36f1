//! Concrete providers satisfying the [`super::LLMProvider`] contract.
//!
//! Real model backends are out-of-scope collaborators; this module keeps
//! only a deterministic mock used for development and tests. Anything that
//! speaks the same request/response contract can stand in for it.

pub mod mock;

pub use mock::MockProvider;
