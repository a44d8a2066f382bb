//! REST API

pub mod caller;
pub mod handlers;
pub mod router;
pub mod state;

pub use caller::Caller;
pub use router::create_router;
pub use state::AppState;
