//! Sunder Render Control
//!
//! Drives an external encoder towards a target output size:
//! - **Codecs / settings:** compile rate-control intent into encoder arguments
//! - **Progress:** fold `key=value` telemetry blocks into typed snapshots
//! - **Adjust:** bracketed bitrate search between attempts
//! - **Controller:** attempt loop, cancellation, history and best result
//!
//! # Control Flow
//!
//! ```text
//! RenderSettings ──▶ compile ──▶ EncoderService::start_render
//!                                        │
//!                    telemetry blocks ◀──┘
//!                           │
//!                    ProgressParser ──▶ observers
//!                           │ progress=end
//!                           ▼
//!                  FileStore::stat ──▶ BitrateSearch ──▶ retry │ finish
//! ```
//!
//! Spawning the encoder and touching the real file system are left to the
//! host through the [`facade`] traits.

pub mod adjust;
pub mod codecs;
pub mod controller;
pub mod facade;
pub mod progress;
pub mod retry;
pub mod settings;

pub use adjust::*;
pub use codecs::*;
pub use controller::*;
pub use facade::*;
pub use progress::*;
pub use settings::*;
