//! Tool contract and registry infrastructure.
//!
//! Tool implementations live in `crew-tools` (native) and `crew-mcp`
//! (subprocess-backed); this module only defines the contract and the
//! dispatch/caching machinery.

pub mod registry;
