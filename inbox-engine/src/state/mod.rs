pub mod session;

pub use session::{ContextGuard, Identity, SessionContext};
