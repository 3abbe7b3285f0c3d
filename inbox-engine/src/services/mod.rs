//! Business logic services
//!
//! - `inbox_service`: the facade over every engine component
//! - `scheduler`: cancellable timers shared by autosave, debounce and polling

pub mod inbox_service;
pub mod scheduler;

pub use inbox_service::InboxService;
pub use scheduler::ScheduledTask;
