//! Integration test helpers for agentchat end-to-end scenarios.
//!
//! Every scenario runs the real engine against the in-memory loopback
//! network with an echo agent on the other side.

pub mod harness;
