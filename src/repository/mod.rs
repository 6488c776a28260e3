//! Public repository API, one repository per encoding.
//!
//! Reads accept any connection or transaction. Writes take a [`DatabaseConnection`] and run
//! through the strategy's [`TreeListener`](crate::listener::TreeListener), so they lock and
//! commit as a unit.
//!
//! [`DatabaseConnection`]: sea_orm::DatabaseConnection

mod closure;
mod materialized_path;
mod nested;

pub use closure::ClosureTreeRepository;
pub use materialized_path::MaterializedPathRepository;
pub use nested::NestedTreeRepository;
