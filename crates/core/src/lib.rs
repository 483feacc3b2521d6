//! Camera streaming session core.
//!
//! Bridges a camera's RTSP streams to a home-automation video client:
//! reserves transport ports, supervises an external FFmpeg-compatible
//! transcoder per session, splits two-way return audio and relays it to the
//! camera speaker, and hands the camera back in its original state when the
//! last session ends.
//!
//! The entry point is [`StreamingManager`], one per camera, driven by the
//! host through prepare, start, reconfigure and stop.

pub mod camera;
pub mod error;
pub mod manager;
pub mod media;
pub mod protocol;
pub mod session;
pub mod transcoder;
pub mod transport;

pub use camera::{CameraHints, CameraSource, StreamProfile};
pub use error::{Result, StreamError};
pub use manager::{StreamNotification, StreamingConfig, StreamingManager};
pub use protocol::{PrepareRequest, PrepareResponse, StreamRequest, StreamRequestHandler};
pub use transport::{PortRange, PortReservoir};
