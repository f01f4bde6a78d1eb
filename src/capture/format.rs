//! Device capability triples (codec, frame size, frame rate)

use std::fmt;

use serde::{Deserialize, Serialize};

/// Four-character code of a pixel or video encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fourcc(pub [u8; 4]);

impl Fourcc {
    /// Parse up to four ASCII characters, padding with spaces
    pub fn parse(code: &str) -> Option<Self> {
        let bytes = code.as_bytes();
        if bytes.is_empty() || bytes.len() > 4 || !code.is_ascii() {
            return None;
        }
        let mut repr = [b' '; 4];
        repr[..bytes.len()].copy_from_slice(bytes);
        Some(Self(repr))
    }
}

impl fmt::Display for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text: String = self
            .0
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
            .collect();
        f.write_str(text.trim_end())
    }
}

/// One capture mode reported by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFormat {
    pub fourcc: Fourcc,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl DeviceFormat {
    pub fn new(fourcc: Fourcc, width: u32, height: u32, fps: u32) -> Self {
        Self {
            fourcc,
            width,
            height,
            fps,
        }
    }

    /// Label shown in the format chooser, e.g. `MJPG -  640 x  480 -   30`
    pub fn label(&self) -> String {
        format!(
            "{:>4} - {:>4} x {:>4} - {:>4}",
            self.fourcc.to_string(),
            self.width,
            self.height,
            self.fps
        )
    }
}

/// Sorted, de-duplicated set of formats keyed by their label
#[derive(Debug, Clone, Default)]
pub struct FormatTable {
    entries: Vec<(String, DeviceFormat)>,
}

impl FormatTable {
    pub fn new(formats: impl IntoIterator<Item = DeviceFormat>) -> Self {
        let mut entries: Vec<(String, DeviceFormat)> =
            formats.into_iter().map(|f| (f.label(), f)).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.dedup_by(|a, b| a.0 == b.0);
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DeviceFormat> {
        self.entries.get(index).map(|(_, f)| f)
    }

    pub fn labels(&self) -> Vec<String> {
        self.entries.iter().map(|(l, _)| l.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mjpg(w: u32, h: u32, fps: u32) -> DeviceFormat {
        DeviceFormat::new(Fourcc(*b"MJPG"), w, h, fps)
    }

    #[test]
    fn label_pads_columns() {
        assert_eq!(mjpg(640, 480, 30).label(), "MJPG -  640 x  480 -   30");
        let y16 = DeviceFormat::new(Fourcc(*b"Y16 "), 1280, 720, 5);
        assert_eq!(y16.label(), " Y16 - 1280 x  720 -    5");
    }

    #[test]
    fn table_sorts_and_dedups() {
        let table = FormatTable::new([
            mjpg(1280, 720, 30),
            mjpg(640, 480, 30),
            mjpg(640, 480, 15),
            mjpg(640, 480, 30),
        ]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(0), Some(&mjpg(640, 480, 15)));
        assert_eq!(table.get(2), Some(&mjpg(1280, 720, 30)));
        assert_eq!(table.get(1), Some(&mjpg(640, 480, 30)));
    }

    #[test]
    fn parse_pads_short_codes() {
        assert_eq!(Fourcc::parse("Y16"), Some(Fourcc(*b"Y16 ")));
        assert_eq!(Fourcc::parse("Y800"), Some(Fourcc(*b"Y800")));
        assert_eq!(Fourcc::parse("TOOLONG"), None);
        assert_eq!(Fourcc::parse(""), None);
    }
}
