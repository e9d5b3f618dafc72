//! Audio input device enumeration

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::error::AudioError;

/// Enumerated input device, addressable by index
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    pub index: usize,
    pub name: String,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// List all available input devices in enumeration order.
///
/// The index is positional and only stable for the lifetime of the
/// process; callers pick a device by index from this list.
pub fn list_input_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut devices = Vec::new();
    let Ok(inputs) = host.input_devices() else {
        return devices;
    };

    for (index, device) in inputs.enumerate() {
        let Ok(name) = device.name() else { continue };
        let (sample_rates, channels) = device_capabilities(&device);
        let is_default = default_name.as_ref() == Some(&name);
        devices.push(AudioDeviceInfo {
            index,
            name,
            is_default,
            sample_rates,
            channels,
        });
    }

    devices
}

/// Supported sample rates (from a common set) and channel counts
fn device_capabilities(device: &cpal::Device) -> (Vec<u32>, Vec<u16>) {
    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();

    if let Ok(configs) = device.supported_input_configs() {
        for config in configs {
            for rate_val in [8_000u32, 16_000, 22_050, 44_100, 48_000, 96_000] {
                let rate = cpal::SampleRate(rate_val);
                if rate >= config.min_sample_rate()
                    && rate <= config.max_sample_rate()
                    && !sample_rates.contains(&rate_val)
                {
                    sample_rates.push(rate_val);
                }
            }
            let ch = config.channels();
            if !channels.contains(&ch) {
                channels.push(ch);
            }
        }
    }

    sample_rates.sort_unstable();
    channels.sort_unstable();
    (sample_rates, channels)
}

/// Resolve an input device: by enumeration index, or the default device
/// when `index` is None.
pub fn device_by_index(index: Option<usize>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();

    match index {
        None => host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound("no default input device".to_string())),
        Some(index) => {
            let devices = host
                .input_devices()
                .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;
            devices
                .enumerate()
                .find(|(i, _)| *i == index)
                .map(|(_, d)| d)
                .ok_or_else(|| AudioError::DeviceNotFound(format!("input device index {index}")))
        }
    }
}
