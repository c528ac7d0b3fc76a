//! Publishing contract between the capture loop and the transport.

use crate::types::{CameraInfo, FrameMessage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("{topic} topic closed")]
    Closed { topic: &'static str },
    #[error("publish on {topic} failed: {reason}")]
    Publish { topic: &'static str, reason: String },
}

/// Outbound topics of one camera.
///
/// Implementations must not block: the capture loop calls them between
/// fetches and any delay here shifts the frame cadence.
pub trait Bus: Send + Sync {
    fn publish_frame(&self, msg: FrameMessage) -> Result<(), BusError>;

    fn publish_camera_info(&self, msg: CameraInfo) -> Result<(), BusError>;
}

impl<B: Bus + ?Sized> Bus for std::sync::Arc<B> {
    fn publish_frame(&self, msg: FrameMessage) -> Result<(), BusError> {
        (**self).publish_frame(msg)
    }

    fn publish_camera_info(&self, msg: CameraInfo) -> Result<(), BusError> {
        (**self).publish_camera_info(msg)
    }
}
