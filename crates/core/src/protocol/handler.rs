use super::request::{ReconfigureRequest, StartRequest};
use crate::error::Result;
use crate::manager::StreamingManager;

/// A stream control request from the host, after prepare.
#[derive(Debug, Clone)]
pub enum StreamRequest {
    Start(StartRequest),
    Reconfigure(ReconfigureRequest),
    Stop { session_id: String },
}

impl StreamRequest {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Start(req) => &req.session_id,
            Self::Reconfigure(req) => &req.session_id,
            Self::Stop { session_id } => session_id,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Reconfigure(_) => "reconfigure",
            Self::Stop { .. } => "stop",
        }
    }
}

/// Single entry point for the host's stream requests.
///
/// Only start can fail; reconfigure and stop on unknown sessions are
/// silent no-ops.
#[derive(Debug, Clone)]
pub struct StreamRequestHandler {
    manager: StreamingManager,
}

impl StreamRequestHandler {
    pub fn new(manager: StreamingManager) -> Self {
        StreamRequestHandler { manager }
    }

    pub async fn handle(&self, request: StreamRequest) -> Result<()> {
        tracing::debug!(session_id = %request.session_id(), request = request.kind(), "stream request");

        match request {
            StreamRequest::Start(req) => {
                let session_id = req.session_id.clone();
                self.manager.start(req).await.inspect_err(|e| {
                    tracing::warn!(session_id = %session_id, error = %e, "start failed");
                })
            }
            StreamRequest::Reconfigure(req) => {
                self.manager.reconfigure(&req);
                Ok(())
            }
            StreamRequest::Stop { session_id } => {
                self.manager.stop(&session_id).await;
                Ok(())
            }
        }
    }
}
