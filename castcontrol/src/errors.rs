use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("No device selected, pick one with /device first")]
    NoDeviceSelected,
    #[error("Invalid device index {index} (found {count} device(s))")]
    InvalidIndex { index: usize, count: usize },
    #[error("Device {device} unavailable: {reason}")]
    DeviceUnavailable { device: String, reason: String },
    #[error("Device discovery failed: {0}")]
    DiscoveryFailed(String),
    #[error("Cannot resolve {link}: {reason}")]
    ResolutionFailed { link: String, reason: String },
    #[error("Device command '{command}' failed: {reason}")]
    DeviceCommand { command: String, reason: String },
    #[error("Nothing is playing")]
    NothingPlaying,
    #[error("No device named {0}, try /devices")]
    UnknownDevice(String),
}

impl ControlError {
    pub fn device_unavailable(device: &str, reason: impl std::fmt::Display) -> Self {
        ControlError::DeviceUnavailable {
            device: device.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn device_command(command: &str, err: anyhow::Error) -> Self {
        ControlError::DeviceCommand {
            command: command.to_string(),
            reason: format!("{:#}", err),
        }
    }

    pub fn resolution_failed(link: &str, reason: impl std::fmt::Display) -> Self {
        ControlError::ResolutionFailed {
            link: link.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True for errors that only go away after the user does something
    /// (select a device, fix the index, start a track).
    pub fn needs_user_action(&self) -> bool {
        matches!(
            self,
            ControlError::NoDeviceSelected
                | ControlError::InvalidIndex { .. }
                | ControlError::UnknownDevice(_)
                | ControlError::NothingPlaying
        )
    }
}

pub type Result<T> = std::result::Result<T, ControlError>;
