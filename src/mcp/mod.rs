//! Model Context Protocol surface over the context engine.

pub mod http;
pub mod server;
pub mod tools;
pub mod types;

pub use http::HttpMcpServer;
pub use server::McpServer;
