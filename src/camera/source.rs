use anyhow::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use thiserror::Error;

/// Camera could not be acquired. Fatal to the session attempt, never retried.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("camera {0} is not available")]
    Unavailable(String),
    #[error("camera access denied: {0}")]
    Denied(String),
}

impl DeviceError {
    /// Classify a backend open failure. Permission refusals are reported as `Denied`.
    pub fn open_failed(device: &str, reason: &str) -> Self {
        let lower = reason.to_lowercase();
        let refused = ["permission", "denied", "not authorized", "eacces"]
            .iter()
            .any(|marker| lower.contains(marker));
        if refused {
            DeviceError::Denied(format!("{device} ({reason})"))
        } else {
            DeviceError::Unavailable(format!("{device} ({reason})"))
        }
    }
}

/// A lossy-encoded still frame, opaque to everything but the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFrame {
    pub width: u32,
    pub height: u32,
    pub mime: &'static str,
    pub data: Bytes,
}

impl EncodedFrame {
    pub fn jpeg(width: u32, height: u32, data: impl Into<Bytes>) -> Self {
        Self {
            width,
            height,
            mime: "image/jpeg",
            data: data.into(),
        }
    }

    /// `data:<mime>;base64,<payload>`
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.data))
    }
}

/// Video source polled by the frame pacer.
pub trait FrameSource {
    /// Latest decoded frame, encoded for transport. `Ok(None)` when no frame is ready yet.
    fn grab(&mut self) -> Result<Option<EncodedFrame>>;

    /// Pixel size of the video surface.
    fn resolution(&self) -> (u32, u32);
}

/// Acquires the video device at session start.
pub trait CameraProvider {
    fn open(&mut self) -> Result<Box<dyn FrameSource>>;
}

impl<F> CameraProvider for F
where
    F: FnMut() -> Result<Box<dyn FrameSource>>,
{
    fn open(&mut self) -> Result<Box<dyn FrameSource>> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url() {
        let frame = EncodedFrame::jpeg(2, 2, vec![0xFF, 0xD8, 0xFF]);
        assert_eq!(frame.to_data_url(), "data:image/jpeg;base64,/9j/");
    }

    #[test]
    fn test_device_error_message() {
        let err = DeviceError::Unavailable("0".to_string());
        assert_eq!(err.to_string(), "camera 0 is not available");
    }

    #[test]
    fn test_open_failure_classification() {
        let denied = DeviceError::open_failed("0", "open VIDEOIO(V4L2:/dev/video0): Permission denied");
        assert!(matches!(denied, DeviceError::Denied(_)));
        assert_eq!(
            denied.to_string(),
            "camera access denied: 0 (open VIDEOIO(V4L2:/dev/video0): Permission denied)"
        );
        assert!(matches!(
            DeviceError::open_failed("1", "camera access has not authorized"),
            DeviceError::Denied(_)
        ));
        assert!(matches!(
            DeviceError::open_failed("2", "can't open camera by index"),
            DeviceError::Unavailable(_)
        ));
    }
}
