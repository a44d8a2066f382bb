//! DCS template repository.
//!
//! Templates are versioned: every edit creates a new immutable version and
//! prior versions stay retrievable. A version moves through review to
//! approval; only approved versions can back a new contract. Deprecation
//! soft-disables a template without deleting anything.

#![deny(unsafe_code)]

mod repository;

pub use repository::{NewTemplate, TemplateRepository, TemplateSource};
