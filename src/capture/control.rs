//! Out-of-band device controls that run beside the capture loop

use std::process::Command;

use tracing::{info, instrument};

use crate::error::{Error, Result};

/// A two-state hardware control (e.g. an illumination LED)
pub trait AuxControl: Send {
    fn label(&self) -> &str;

    fn icon(&self) -> &str {
        "semibreve.svg"
    }

    /// Flip the control, returning the new state
    fn toggle(&mut self) -> Result<bool>;
}

/// Dino-Lite LED, switched through a UVC extension-unit control
pub struct UvcLed {
    path: String,
    on: bool,
}

const DINO_LITE_NAMES: &[&str] = &["Dino-Lite Edge"];
const LED_SELECTOR: &str = "4:2";
const LED_OFF: &str = "f2000000000000";
const LED_ON: &str = "f2010000000000";

impl UvcLed {
    /// Only devices known to carry the LED get the control
    pub fn for_device(name: &str, path: &str) -> Option<Self> {
        DINO_LITE_NAMES.contains(&name).then(|| Self {
            path: path.to_string(),
            on: true,
        })
    }
}

impl AuxControl for UvcLed {
    fn label(&self) -> &str {
        "LED Off/On"
    }

    #[instrument(skip(self), fields(path = %self.path))]
    fn toggle(&mut self) -> Result<bool> {
        let value = if self.on { LED_OFF } else { LED_ON };
        let status = Command::new("uvcdynctrl")
            .args(["-d", &self.path, "-S", LED_SELECTOR, value])
            .status()
            .map_err(|e| Error::Device(format!("uvcdynctrl: {e}")))?;
        if !status.success() {
            return Err(Error::Device(format!("uvcdynctrl exited with {status}")));
        }
        self.on = !self.on;
        info!(on = self.on, "LED toggled");
        Ok(self.on)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn led_only_for_known_devices() {
        assert!(UvcLed::for_device("Dino-Lite Edge", "/dev/video2").is_some());
        assert!(UvcLed::for_device("Integrated Camera", "/dev/video0").is_none());
    }
}
