//! Analysis E2E test suite.
//!
//! Drives queue payloads through the analyze handler and the pipeline with
//! in-memory collaborators. `test_postgres_store` additionally needs a
//! PostgreSQL database at DATABASE_URL and is ignored by default.
//!
//! Run with: cargo test --test analysis_e2e

mod test_helpers;

mod test_clone_concurrency;
mod test_happy_path;
mod test_parser_error;
mod test_postgres_store;
mod test_private_repo;
mod test_timeout;
