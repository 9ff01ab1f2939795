//! Infrastructure layer: durable queue, dispatch, consumption, SLA enforcement,
//! external clients, config.

pub mod config;
pub mod dispatcher;
pub mod external;
pub mod queue;
pub mod sla;
pub mod workers;
