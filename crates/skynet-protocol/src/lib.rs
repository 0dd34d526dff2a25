//! skynet-protocol — wire types shared between the gateway and its clients.
//!
//! Pure data definitions (frames, handshake payloads, method name constants);
//! no I/O. Kept dependency-free so it can be vendored into client SDKs.

pub mod frames;
pub mod handshake;
pub mod methods;
