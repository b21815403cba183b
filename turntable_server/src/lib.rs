//! Remote TCP command interface for the turntable control core.

pub mod server;

pub use server::RemoteCommandServer;
