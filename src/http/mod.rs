//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, catch-all handler)
//!     → request header filters (client observation started)
//!     → hyper client → upstream
//!     → response header filters (client observation stopped)
//!     → Send to client
//! ```

pub mod server;

pub use server::HttpServer;
