//! Capture device discovery for `doctor` and `status`.

use std::{fmt, fs, path::PathBuf};

#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub path: PathBuf,
    pub name: String,
}

impl fmt::Display for CameraInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.path.display())
    }
}

/// V4L2 capture nodes under /dev, sorted by index.
pub fn discover_cameras() -> Vec<CameraInfo> {
    let mut out = vec![];
    if let Ok(rd) = fs::read_dir("/dev") {
        for e in rd.flatten() {
            let p = e.path();
            let Some(index) = p
                .file_name()
                .and_then(|s| s.to_str())
                .and_then(|s| s.strip_prefix("video"))
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            let name = fs::read_to_string(format!("/sys/class/video4linux/video{index}/name"))
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            out.push((index, CameraInfo { path: p, name }));
        }
    }
    out.sort_by_key(|(index, _)| *index);
    out.into_iter().map(|(_, cam)| cam).collect()
}
