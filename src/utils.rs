use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};
use v4l::{capability::Flags, Device};

use crate::capture::format::FormatTable;
use crate::capture::v4l2::enumerate_formats;

/// Wall-clock seconds since the Unix epoch
pub fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Detected capture device info
#[derive(Debug, Clone)]
pub struct FoundDevice {
    pub path: String,
    /// Card name reported by the driver
    pub name: String,
    pub formats: FormatTable,
}

/// Every `/dev/videoN` node that supports video capture
pub fn list_devices() -> Vec<FoundDevice> {
    info!("Detecting capture devices...");
    let mut found = Vec::new();

    for i in 0..64 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            debug!("{} is not a capture node", path);
            continue;
        }
        drop(dev);

        let formats = match enumerate_formats(&path) {
            Ok(formats) => formats,
            Err(e) => {
                debug!("cannot list formats of {}: {}", path, e);
                FormatTable::default()
            }
        };
        info!("Found {} - {} ({} formats)", path, caps.card, formats.len());
        found.push(FoundDevice {
            path,
            name: caps.card,
            formats,
        });
    }

    found
}

/// Card name of the device at `path`, falling back to the path itself
pub fn device_name(path: &str) -> String {
    Device::with_path(path)
        .and_then(|dev| dev.query_caps())
        .map(|caps| caps.card)
        .unwrap_or_else(|_| path.to_string())
}
