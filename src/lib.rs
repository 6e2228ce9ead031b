// SPDX-License-Identifier: GPL-3.0-only

//! rawcam - zero-shutter-lag raw capture engine
//!
//! This library drives a hardware camera pipeline producing raw sensor
//! frames at video rate, buffers those frames in a bounded pool so a
//! "shutter" action can retrospectively snapshot already-captured frames,
//! and interleaves manually-exposed bracket bursts for multi-frame HDR
//! captures.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`adapter`]: Narrow contract around the platform camera stack, plus a
//!   simulated implementation for tests and hardware-free hosts
//! - [`buffers`]: Raw frame buffers, the free/ready buffer pool, and the
//!   capture container artifact
//! - [`consumer`]: Worker that pairs reader images with capture metadata
//!   and publishes them into the pool
//! - [`session`]: The capture session controller and its event loop
//! - [`descriptor`], [`settings`]: Static device description and
//!   host-provided post-processing settings
//!
//! The controller owns all native capture objects on a single event-loop
//! thread; adapter callbacks arrive on foreign threads and are translated
//! into queued events. See the [`session`] module for the threading rules.
//!
//! # Example
//!
//! ```no_run
//! use rawcam::adapter::sim::SimAdapter;
//! use rawcam::adapter::OutputConfiguration;
//! use rawcam::buffers::pool::RawBufferPool;
//! use rawcam::consumer::RawImageConsumer;
//! use rawcam::descriptor::CameraDescriptor;
//! use rawcam::session::listener::CameraSessionListener;
//! use rawcam::session::CameraSession;
//! use rawcam::types::{CameraSessionState, RawPixelFormat};
//! use std::sync::Arc;
//!
//! struct Listener;
//! impl CameraSessionListener for Listener {
//!     fn on_camera_state_changed(&self, state: CameraSessionState) {
//!         println!("camera state: {state:?}");
//!     }
//!     fn on_camera_error(&self, _error: i32) {}
//!     fn on_camera_disconnected(&self) {}
//! }
//!
//! let descriptor = CameraDescriptor::default();
//! let adapter = Arc::new(SimAdapter::new(descriptor.clone()));
//! let pool = RawBufferPool::new();
//! let output = OutputConfiguration {
//!     width: 4000,
//!     height: 3000,
//!     format: RawPixelFormat::Raw16,
//! };
//! let consumer = Arc::new(RawImageConsumer::with_defaults(Arc::clone(&pool), output));
//!
//! let session = CameraSession::new(adapter, descriptor, Arc::new(Listener), consumer, pool);
//! session.open_camera(output, false);
//! // ... capture ...
//! session.close_camera();
//! ```

pub mod adapter;
pub mod buffers;
pub mod constants;
pub mod consumer;
pub mod descriptor;
pub mod errors;
pub mod session;
pub mod settings;
pub mod types;

// Re-export commonly used types
pub use adapter::{DeviceAdapter, OutputConfiguration};
pub use buffers::pool::{LockedBuffers, RawBufferPool};
pub use consumer::RawImageConsumer;
pub use descriptor::CameraDescriptor;
pub use session::listener::CameraSessionListener;
pub use session::CameraSession;
pub use settings::PostProcessSettings;
pub use types::{CameraSessionState, RawPixelFormat, RawType, ScreenOrientation};
