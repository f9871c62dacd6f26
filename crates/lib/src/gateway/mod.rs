//! Event server: receives OneBot HTTP POST event reports and hands group messages to the relay.
//!
//! Single port. `GET /` is a health probe; `POST /` and `POST /onebot/event` accept events.

mod server;

pub use server::{router, run_server, ServerState};
