//! RPC layer: WebSocket client, message dispatcher and typed sender

pub mod client;
pub mod dispatcher;
pub mod sender;

pub use client::{Credentials, RpcClient, RpcListener, RpcSpy};
pub use dispatcher::{from_payload, to_payload, HandlerResult, MessageDispatcher, MessageHandler, OcppError};
pub use sender::{CallResult, MessageSender};
