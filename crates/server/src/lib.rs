//! Pulse server.
//!
//! Receives metric updates over HTTP and gRPC, runs them through a layered
//! security/codec middleware chain, and writes them to the configured store.
//!
//! # HTTP surface
//!
//! | Method | Path                              | Purpose                         |
//! |--------|-----------------------------------|---------------------------------|
//! | GET    | `/`                               | All metrics, `name: value` rows |
//! | GET    | `/value/{type}/{name}`            | One scalar value                |
//! | POST   | `/update/{type}/{name}/{value}`   | Upsert from the path            |
//! | POST   | `/update/`                        | Upsert from a JSON body         |
//! | POST   | `/value/`                         | Read, JSON body in/out          |
//! | GET    | `/ping`                           | Storage liveness                |
//! | POST   | `/updates/`                       | Batch upsert from a JSON body   |
//!
//! The batch endpoint peels the agent's envelope in reverse: signature check
//! on the raw body, then gzip, then RSA. A successful batch write fans an
//! audit record out to the configured sinks.

pub mod config;
pub mod grpc;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;
pub mod subnet;

pub use config::ServerConfig;
pub use router::build_router;
pub use state::AppState;
