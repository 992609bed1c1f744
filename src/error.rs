use btleplug;
use futures::channel::mpsc::SendError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("A required bluetooth characteristic is not available")]
    MissingCharacteristic,

    #[error("Service discovery did not complete within the allowed window")]
    DiscoveryTimeout,

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("Failed to send device event over mpsc channel: {source}")]
    SendError { #[from] source: SendError },
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start session (device): {source}")]
    Device { #[from] source: DeviceError },

    #[error("Failed to start tokio runtime: {source}")]
    Runtime { #[from] source: std::io::Error },
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc::channel;
    use futures::SinkExt;

    #[test]
    fn run_errors_wrap_their_sources() {
        let err = AppRunError::from(DeviceError::NoAdapter);
        assert!(matches!(err, AppRunError::Device { .. }));

        let err = AppRunError::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(matches!(err, AppRunError::Runtime { .. }));
    }

    #[tokio::test]
    async fn closed_command_channel_surfaces_as_device_error() {
        let (mut sender, receiver) = channel::<u8>(1);
        drop(receiver);

        let err: DeviceError = sender.send(1).await.unwrap_err().into();
        assert!(matches!(err, DeviceError::SendError { .. }));
    }
}
