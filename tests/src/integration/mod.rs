//! Integration flows

pub mod http_flows;
pub mod lifecycle_flows;
