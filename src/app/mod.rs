pub mod context;
pub mod error;

pub use context::{AppContext, StartupWarning};
pub use error::{Result, RssqError};
