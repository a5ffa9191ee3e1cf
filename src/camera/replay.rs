//! Replays a directory of JPEG stills as a looping video source.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::source::{DeviceError, EncodedFrame, FrameSource};

pub struct ReplaySource {
    files: Vec<PathBuf>,
    cursor: usize,
    width: u32,
    height: u32,
}

impl ReplaySource {
    /// Collect `*.jpg` / `*.jpeg` files in name order. An empty directory is an unavailable device.
    pub fn open<P: AsRef<Path>>(dir: P, width: u32, height: u32) -> Result<Self> {
        let dir = dir.as_ref();
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|e| DeviceError::open_failed(&dir.display().to_string(), &e.to_string()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(DeviceError::Unavailable(format!("{} (no jpeg files)", dir.display())).into());
        }

        Ok(Self {
            files,
            cursor: 0,
            width,
            height,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ReplaySource {
    fn grab(&mut self) -> Result<Option<EncodedFrame>> {
        let path = &self.files[self.cursor];
        let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        self.cursor = (self.cursor + 1) % self.files.len();
        Ok(Some(EncodedFrame::jpeg(self.width, self.height, data)))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rehab_live_replay_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_replay_cycles_in_name_order() {
        let dir = scratch_dir("cycle");
        fs::write(dir.join("b.jpg"), [2u8]).unwrap();
        fs::write(dir.join("a.jpg"), [1u8]).unwrap();
        fs::write(dir.join("notes.txt"), b"skip").unwrap();

        let mut source = ReplaySource::open(&dir, 640, 480).unwrap();
        assert_eq!(source.len(), 2);
        let first = source.grab().unwrap().unwrap();
        let second = source.grab().unwrap().unwrap();
        let third = source.grab().unwrap().unwrap();
        assert_eq!(first.data.as_ref(), &[1u8]);
        assert_eq!(second.data.as_ref(), &[2u8]);
        assert_eq!(third.data.as_ref(), &[1u8]);
        assert_eq!(first.width, 640);
        assert_eq!(source.resolution(), (640, 480));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_empty_dir_is_unavailable() {
        let dir = scratch_dir("empty");
        let err = ReplaySource::open(&dir, 640, 480).err().unwrap();
        assert!(err.downcast_ref::<DeviceError>().is_some());
        fs::remove_dir_all(&dir).ok();
    }
}
