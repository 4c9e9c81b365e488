pub mod commands;
pub mod control;
pub mod envfile;
pub mod status;

pub use control::{control_agent, fetch_logs, rebind_agent, Binding, ControlOutcome};
pub use envfile::patch_env;
pub use status::{parse_state, read_status, try_read_status, StateSummary};
