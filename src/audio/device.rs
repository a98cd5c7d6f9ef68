//! Audio device enumeration on the default cpal host

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::error::AudioError;

/// Summary of a device for listings
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default_output: bool,
    pub sample_rates: Vec<u32>,
}

impl DeviceInfo {
    /// Whether the device can be opened for capture
    pub fn can_capture(&self) -> bool {
        self.is_input || self.is_output
    }
}

/// List all available audio devices, merging input and output roles by name
pub fn list_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let mut devices: Vec<DeviceInfo> = Vec::new();
    let default_output = default_output_name();

    if let Ok(inputs) = host.input_devices() {
        for device in inputs {
            if let Ok(name) = device.name() {
                devices.push(DeviceInfo {
                    is_default_output: default_output.as_ref() == Some(&name),
                    sample_rates: supported_rates(&device, true),
                    name,
                    is_input: true,
                    is_output: false,
                });
            }
        }
    }

    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            if let Ok(name) = device.name() {
                if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                    existing.is_output = true;
                    continue;
                }
                devices.push(DeviceInfo {
                    is_default_output: default_output.as_ref() == Some(&name),
                    sample_rates: supported_rates(&device, false),
                    name,
                    is_input: false,
                    is_output: true,
                });
            }
        }
    }

    devices
}

/// Sample rates this crate can stream at that the device supports
fn supported_rates(device: &cpal::Device, is_input: bool) -> Vec<u32> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = if is_input {
        device
            .supported_input_configs()
            .map(|configs| configs.collect())
            .unwrap_or_default()
    } else {
        device
            .supported_output_configs()
            .map(|configs| configs.collect())
            .unwrap_or_default()
    };

    let mut rates: Vec<u32> = [44_100u32, 48_000]
        .into_iter()
        .filter(|&rate| {
            ranges.iter().any(|range| {
                cpal::SampleRate(rate) >= range.min_sample_rate()
                    && cpal::SampleRate(rate) <= range.max_sample_rate()
            })
        })
        .collect();
    rates.sort_unstable();
    rates
}

/// Names of every device a capture stream can be opened on.
///
/// Output devices are included because capturing from an output device
/// records what it plays on hosts with loopback support (WASAPI).
pub fn loopback_device_names() -> Vec<String> {
    list_devices()
        .into_iter()
        .filter(DeviceInfo::can_capture)
        .map(|d| d.name)
        .collect()
}

/// Find a capture device by exact name, preferring true input devices
pub fn find_capture_device(name: &str) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();

    let inputs = host
        .input_devices()
        .map_err(|e| AudioError::CpalError(e.to_string()))?;
    if let Some(device) = find_named(inputs, name) {
        return Ok(device);
    }

    let outputs = host
        .output_devices()
        .map_err(|e| AudioError::CpalError(e.to_string()))?;
    find_named(outputs, name).ok_or_else(|| AudioError::DeviceNotFound(name.to_string()))
}

fn find_named(mut devices: impl Iterator<Item = cpal::Device>, name: &str) -> Option<cpal::Device> {
    devices.find(|d| d.name().map(|n| n == name).unwrap_or(false))
}

/// Name of the current default output device
pub fn default_output_name() -> Option<String> {
    cpal::default_host()
        .default_output_device()
        .and_then(|d| d.name().ok())
}

/// Get default output device
pub fn get_default_output_device() -> Result<cpal::Device, AudioError> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))
}
