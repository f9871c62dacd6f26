//! OneBot relay core: answer group-chat messages with an LLM completion.
//!
//! An inbound event flows normalizer → completion orchestrator → reply dispatcher, all driven
//! from [`relay::Relay`]. The binary crate wires it to the event server or a one-shot run.

pub mod channels;
pub mod completion;
pub mod config;
pub mod dispatch;
pub mod gateway;
pub mod llm;
pub mod normalize;
pub mod relay;
pub mod retry;
