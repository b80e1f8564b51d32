//! Integration tests: full cycles against in-memory collaborators.

mod mocks;
mod pool;
mod scenarios;
