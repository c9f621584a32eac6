//! rollcall-hw: V4L2 camera capture as a rollcall frame source.

pub mod camera;
pub mod convert;

pub use camera::{Camera, CameraError, PixelFormat};
