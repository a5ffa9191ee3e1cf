use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use opencv::{
    core::{Mat, Vector},
    imgcodecs, imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureAPIs},
};
use tracing::{info, warn};

use super::source::{DeviceError, EncodedFrame, FrameSource};

/// 別スレッドでキャプチャし、最新フレームだけを保持する
pub struct ThreadedCamera {
    latest: Arc<Mutex<Option<Mat>>>,
    frame_id: Arc<AtomicU64>,
    last_taken: u64,
    running: Arc<AtomicBool>,
    width: u32,
    height: u32,
    jpeg_quality: i32,
    _handle: thread::JoinHandle<()>,
}

impl ThreadedCamera {
    pub fn start(index: i32, width: u32, height: u32, jpeg_quality: i32) -> Result<Self> {
        let mut capture = VideoCapture::new(index, VideoCaptureAPIs::CAP_ANY as i32)
            .map_err(|e| DeviceError::open_failed(&index.to_string(), &e.to_string()))?;
        if !capture.is_opened()? {
            return Err(DeviceError::Unavailable(index.to_string()).into());
        }

        capture.set(videoio::CAP_PROP_FRAME_WIDTH, width as f64)?;
        capture.set(videoio::CAP_PROP_FRAME_HEIGHT, height as f64)?;
        capture.set(videoio::CAP_PROP_BUFFERSIZE, 1.0)?;

        let actual_width = capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as u32;
        let actual_height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as u32;
        info!(index, actual_width, actual_height, "camera opened");

        let latest = Arc::new(Mutex::new(None::<Mat>));
        let latest_ref = latest.clone();
        let frame_id = Arc::new(AtomicU64::new(0));
        let frame_id_ref = frame_id.clone();
        let running = Arc::new(AtomicBool::new(true));
        let running_ref = running.clone();

        let handle = thread::spawn(move || {
            while running_ref.load(Ordering::Relaxed) {
                let mut frame = Mat::default();
                match capture.read(&mut frame) {
                    Ok(true) if !frame.empty() => {
                        if let Ok(mut slot) = latest_ref.lock() {
                            *slot = Some(frame);
                        }
                        frame_id_ref.fetch_add(1, Ordering::Release);
                    }
                    Ok(_) => thread::sleep(Duration::from_millis(5)),
                    Err(e) => {
                        warn!(index, error = %e, "camera read failed");
                        thread::sleep(Duration::from_millis(100));
                    }
                }
            }
        });

        Ok(Self {
            latest,
            frame_id,
            last_taken: 0,
            running,
            width: actual_width,
            height: actual_height,
            jpeg_quality,
            _handle: handle,
        })
    }
}

impl FrameSource for ThreadedCamera {
    fn grab(&mut self) -> Result<Option<EncodedFrame>> {
        let current = self.frame_id.load(Ordering::Acquire);
        if current == self.last_taken {
            return Ok(None);
        }
        let frame = {
            let mut slot = self
                .latest
                .lock()
                .map_err(|_| anyhow::anyhow!("camera frame slot poisoned"))?;
            slot.take()
        };
        let Some(frame) = frame else {
            return Ok(None);
        };
        self.last_taken = current;
        let data = jpeg_encode(&frame, self.jpeg_quality)?;
        Ok(Some(EncodedFrame::jpeg(
            frame.cols() as u32,
            frame.rows() as u32,
            data,
        )))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for ThreadedCamera {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

fn jpeg_encode(frame: &Mat, quality: i32) -> Result<Vec<u8>> {
    let params = Vector::from_iter([imgcodecs::IMWRITE_JPEG_QUALITY, quality]);
    let mut buf: Vector<u8> = Vector::new();

    // imencode は BGR 8UC3 を想定
    let mat = if frame.channels() == 4 {
        let mut bgr = Mat::default();
        imgproc::cvt_color_def(frame, &mut bgr, imgproc::COLOR_BGRA2BGR)?;
        bgr
    } else {
        frame.clone()
    };

    imgcodecs::imencode(".jpg", &mat, &mut buf, &params).context("jpeg encode failed")?;
    Ok(buf.to_vec())
}
