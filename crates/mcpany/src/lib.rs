// mcpany: tool-execution gateway core
//
// A uniform "invoke a tool by name with JSON arguments" surface fanned
// out to heterogeneous transports (HTTP, OpenAPI, gRPC, WebSocket,
// WebRTC data channels, sub-processes, nested model-context servers).
// The registry owns the tool catalogue and per-profile views; the
// pipeline runs pre-hooks, middleware and post-hooks around the
// transport call; shared security validators screen every
// user-controlled string before it reaches a wire request.

pub mod activity;
pub mod auth;
pub mod bus;
pub mod config;
pub mod errors;
pub mod history;
pub mod hooks;
pub mod pipeline;
pub mod policy;
pub mod pool;
pub mod registry;
pub mod secret;
pub mod security;
pub mod telemetry;
pub mod template;
pub mod transport;

pub use errors::GatewayError;
pub use pipeline::{CacheAction, CallContext, ExecutionRequest};
pub use registry::ToolRegistry;
