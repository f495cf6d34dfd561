pub mod hardware;

pub use doorlock_core::app_state::*;
