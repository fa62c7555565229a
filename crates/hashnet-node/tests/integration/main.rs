//! Integration test entry point for hashnet-node.
//!
//! Every test builds an in-process network over in-memory links and runs on
//! a paused clock, so link delays and RTTs are deterministic.

mod harness;
mod discovery;
mod mesh;
mod rpc;
