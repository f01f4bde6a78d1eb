use std::fmt::Display;

use chrono::{DateTime, TimeZone};

/// Name of a recording file:
/// `<device>_D<YYYY-MM-DD>_T<HHMMSS><tz>_R<width>x<height>_F<fps>[_<suffix>].<ext>`.
/// `width` and `height` are those of the stored channel.
pub fn recording_file_name<Tz>(
    device: &str,
    started: &DateTime<Tz>,
    width: u32,
    height: u32,
    fps: f64,
    suffix: Option<&str>,
    extension: &str,
) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let device = sanitize(device);
    let stamp = started.format("_D%Y-%m-%d_T%H%M%S%z");
    let suffix = match suffix.map(str::trim) {
        Some(s) if !s.is_empty() => format!("_{}", sanitize(s)),
        _ => String::new(),
    };
    let extension = extension.trim_start_matches('.');
    format!("{device}{stamp}_R{width}x{height}_F{fps}{suffix}.{extension}")
}

/// Keep names inside the output directory
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '-',
            c => c,
        })
        .collect()
}
