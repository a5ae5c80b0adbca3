//! Two-phase neighbour exchange: sizes first, then data.
//!
//! Both phases post every send before any receive and drain all handles,
//! so the helpers work with eager-receive transports as well.

pub mod data_exchange;
pub mod size_exchange;

pub use data_exchange::exchange_records;
pub use size_exchange::{exchange_counts, exchange_headers};
