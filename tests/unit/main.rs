//! Unit tests for individual components

mod activity_test;
mod adapt_test;
mod builders_test;
mod config_test;
mod error_test;
mod runtime_test;
mod util_test;
