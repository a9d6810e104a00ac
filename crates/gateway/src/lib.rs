//! Tool-dispatch gateway.
//!
//! Exposes a compiled tool catalog to the MCP protocol layer: `list_tools()` /
//! `call_tool()`-shaped methods producing `rmcp` model types, stable external naming, and
//! normalization of every success and failure into a uniform content envelope. The transport
//! that frames requests and responses lives outside this crate.

pub mod config;
pub mod dispatch;

pub use config::GatewayConfig;
pub use dispatch::ToolGateway;
