//! CLI context interface — re-exported from the shared pipeline.

pub use skynet_agent::pipeline::MessageContext as CliAppContext;
