pub mod dedup;
pub mod loader;
pub mod mask;
pub mod metrics_consts;
pub mod queue;
pub mod record;
pub mod validate;
