pub mod adapter;
pub mod context;
pub mod error;

pub use adapter::CliAdapter;
pub use context::CliAppContext;
pub use error::CliError;
