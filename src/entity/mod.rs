//! SeaORM entity definitions for PostgreSQL database.

pub mod analysis;
pub mod codebase;
pub mod oauth_account;
pub mod test_case;
pub mod test_suite;
