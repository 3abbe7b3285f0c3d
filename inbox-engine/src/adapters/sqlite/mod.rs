pub mod drafts;
pub mod pool;
pub mod schema;

pub use pool::DbPool;
