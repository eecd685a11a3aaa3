//! Workspace root crate.
//!
//! Holds only the top-level integration test suite (`tests/integration/`);
//! all runtime code lives in `crates/wg-protocol`, `crates/wg-core`,
//! `crates/wg-test-utils`, and `services/gateway`.
