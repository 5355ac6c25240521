//! # imgbench
//!
//! An RGBA image family for `workrpc`, the consumer-facing
//! [`ImageObjectService`](service::ImageObjectService), and a harness that
//! times the average filter on the calling thread against the same filter run
//! on a worker.

pub mod bench;
pub mod config;
pub mod family;
pub mod image;
pub mod service;

pub use config::BenchConfig;
pub use config::Mode;
pub use family::ImageContents;
pub use family::ImageFamily;
pub use service::ImageObjectService;
