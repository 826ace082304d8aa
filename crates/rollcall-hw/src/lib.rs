//! rollcall-hw: Webcam access for the attendance kiosk.
//!
//! A [`CameraSession`] owns the V4L2 device handle for as long as a screen or
//! request needs it and releases it when dropped.

pub mod camera;
pub mod frame;

pub use camera::{CameraError, CameraSession, DeviceInfo, PixelFormat};
pub use frame::Frame;
