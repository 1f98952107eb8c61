//! Domain models shared by the engine and its storage backends.

pub mod auth;
