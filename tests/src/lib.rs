//! # Hold-Invoice Test Suite
//!
//! Cross-crate flows that run the lifecycle manager, the simulated node and
//! the HTTP gateway together.
//!
//! ```text
//! tests/
//! ├── benches/          # criterion benchmarks
//! └── src/integration/
//!     ├── lifecycle_flows.rs  # service API against the simulated node
//!     └── http_flows.rs       # full HTTP round trips on a bound socket
//! ```
//!
//! ```bash
//! cargo test -p invoice-tests
//! cargo bench -p invoice-tests
//! ```

pub mod integration;
