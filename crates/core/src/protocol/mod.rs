//! Host protocol boundary.
//!
//! The host (the home-automation runtime) drives every stream through four
//! operations keyed by an opaque session ID:
//!
//! | Operation | Request | Purpose |
//! |-----------|---------|---------|
//! | prepare | [`PrepareRequest`] | Reserve ports, exchange SRTP keys and SSRCs |
//! | start | [`StartRequest`] | Launch the transcoder with the chosen parameters |
//! | reconfigure | [`ReconfigureRequest`] | Change bitrate of a running stream |
//! | stop | session ID | Tear everything down |
//!
//! Prepare is answered with a [`PrepareResponse`]; start, reconfigure and
//! stop arrive as a [`StreamRequest`] and are dispatched by
//! [`StreamRequestHandler`].

pub mod handler;
pub mod request;
pub mod response;

pub use handler::{StreamRequest, StreamRequestHandler};
pub use request::{
    AddressFamily, AudioCodec, AudioParameters, H264Level, H264Profile, MediaEndpoint,
    PrepareRequest, ReconfigureRequest, StartRequest, VideoParameters,
};
pub use response::{PrepareResponse, ResponseEndpoint};
