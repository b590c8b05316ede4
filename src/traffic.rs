//! Traffic accounting and the in-place traffic display

use std::io::Write;

use crate::tunnel::uapi::parse_counters;
use crate::tunnel::TunnelHandle;

/// Byte counters read from the device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficSample {
    pub received_bytes: u64,
    pub sent_bytes: u64,
}

/// Read the device counters. A missing handle or failed query yields the zero sample.
pub fn sample(handle: Option<&TunnelHandle>) -> TrafficSample {
    let Some(handle) = handle else {
        return TrafficSample::default();
    };

    match handle.status() {
        Ok(text) => {
            let (received_bytes, sent_bytes) = parse_counters(&text);
            TrafficSample {
                received_bytes,
                sent_bytes,
            }
        }
        Err(e) => {
            tracing::trace!("Traffic sample unavailable: {}", e);
            TrafficSample::default()
        }
    }
}

/// Two-line `↓ received` / `↑ sent` display, redrawn in place on change
pub struct TrafficDisplay<W: Write> {
    out: W,
    enabled: bool,
}

impl<W: Write> TrafficDisplay<W> {
    pub fn new(out: W, enabled: bool) -> Self {
        Self { out, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Print the initial lines that later updates overwrite
    pub fn start(&mut self) {
        if self.enabled {
            let _ = self.write_lines(TrafficSample::default());
        }
    }

    /// Redraw if `current` differs from `last`; returns the sample to compare against next time
    pub fn update(&mut self, last: TrafficSample, current: TrafficSample) -> TrafficSample {
        if !self.enabled || current == last {
            return last;
        }
        // Cursor up two lines, clear to end of screen
        let _ = write!(self.out, "\x1b[2F\x1b[J");
        let _ = self.write_lines(current);
        current
    }

    fn write_lines(&mut self, sample: TrafficSample) -> std::io::Result<()> {
        writeln!(self.out, "↓ {} received", format_bytes(sample.received_bytes))?;
        writeln!(self.out, "↑ {} sent", format_bytes(sample.sent_bytes))?;
        self.out.flush()
    }

    #[cfg(test)]
    pub(crate) fn output(&self) -> &W {
        &self.out
    }
}

/// SI byte count: `0 B`, `999 B`, `1.5 kB`, `15 kB`, `2.0 MB`.
/// One decimal below 10 of a unit, none above; rounded to a tenth first,
/// so 999_999 is `1000 kB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 7] = ["B", "kB", "MB", "GB", "TB", "PB", "EB"];

    if bytes < 10 {
        return format!("{} B", bytes);
    }

    let mut unit = 0;
    let mut scale: u64 = 1;
    while unit < UNITS.len() - 1 && bytes / scale >= 1000 {
        scale *= 1000;
        unit += 1;
    }

    let value = (bytes as f64 / scale as f64 * 10.0 + 0.5).floor() / 10.0;
    if value < 10.0 {
        format!("{:.1} {}", value, UNITS[unit])
    } else {
        format!("{:.0} {}", value, UNITS[unit])
    }
}
