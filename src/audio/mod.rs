//! Local audio capture subsystem

pub mod capture;
pub mod device;
pub mod ring;

pub use capture::{AudioCapture, AudioSegment};
pub use device::{device_by_index, list_input_devices, AudioDeviceInfo};
pub use ring::SampleRing;
