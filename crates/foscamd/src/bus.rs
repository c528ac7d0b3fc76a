//! In-process pub/sub for the image and camera-info topics.

use foscam_core::{Bus, BusError, CameraInfo, FrameMessage};
use tokio::sync::broadcast;

/// Subscribers that fall behind only ever see the newest message.
const TOPIC_CAPACITY: usize = 1;

/// Broadcast topics fed by the capture loop.
pub struct BroadcastBus {
    frames: broadcast::Sender<FrameMessage>,
    camera_info: broadcast::Sender<CameraInfo>,
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastBus {
    pub fn new() -> Self {
        let (frames, _) = broadcast::channel(TOPIC_CAPACITY);
        let (camera_info, _) = broadcast::channel(TOPIC_CAPACITY);
        Self {
            frames,
            camera_info,
        }
    }

    pub fn subscribe_frames(&self) -> broadcast::Receiver<FrameMessage> {
        self.frames.subscribe()
    }

    pub fn subscribe_camera_info(&self) -> broadcast::Receiver<CameraInfo> {
        self.camera_info.subscribe()
    }
}

impl Bus for BroadcastBus {
    fn publish_frame(&self, msg: FrameMessage) -> Result<(), BusError> {
        // No subscribers is not an error: the message is simply dropped.
        if self.frames.send(msg).is_err() {
            tracing::trace!("image has no subscribers");
        }
        Ok(())
    }

    fn publish_camera_info(&self, msg: CameraInfo) -> Result<(), BusError> {
        if self.camera_info.send(msg).is_err() {
            tracing::trace!("camera_info has no subscribers");
        }
        Ok(())
    }
}
