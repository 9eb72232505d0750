pub mod commands;
pub mod executor;
pub mod state;

pub use commands::{ActionRequest, ActionResult};
pub use executor::ActionExecutor;
pub use state::{replay_state, LifecycleAction};
