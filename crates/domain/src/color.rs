//! RGB color value with HSV and hex conversions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// An 8-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Hue in degrees `[0, 360)`, saturation and value in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hsv {
    pub h: f64,
    pub s: f64,
    pub v: f64,
}

impl Color {
    pub const BLACK: Self = Self::rgb(0, 0, 0);
    pub const WHITE: Self = Self::rgb(255, 255, 255);

    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#rrggbb` (the leading `#` is optional).
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidColor`] when the string is not six hex digits.
    pub fn from_hex(hex: &str) -> Result<Self, ValidationError> {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        if digits.len() != 6 || !digits.is_ascii() {
            return Err(ValidationError::InvalidColor(hex.to_string()));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&digits[range], 16)
                .map_err(|_| ValidationError::InvalidColor(hex.to_string()))
        };
        Ok(Self::rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }

    #[must_use]
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    #[must_use]
    pub fn from_hsv(hsv: Hsv) -> Self {
        let h = hsv.h.rem_euclid(360.0) / 60.0;
        let s = hsv.s.clamp(0.0, 1.0);
        let v = hsv.v.clamp(0.0, 1.0);
        let c = v * s;
        let x = c * (1.0 - ((h % 2.0) - 1.0).abs());
        let m = v - c;
        let (r, g, b) = match h {
            h if h < 1.0 => (c, x, 0.0),
            h if h < 2.0 => (x, c, 0.0),
            h if h < 3.0 => (0.0, c, x),
            h if h < 4.0 => (0.0, x, c),
            h if h < 5.0 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };
        Self::rgb(to_channel(r + m), to_channel(g + m), to_channel(b + m))
    }

    #[must_use]
    pub fn to_hsv(self) -> Hsv {
        let r = f64::from(self.r) / 255.0;
        let g = f64::from(self.g) / 255.0;
        let b = f64::from(self.b) / 255.0;
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = max - min;

        let h = if delta == 0.0 {
            0.0
        } else if (max - r).abs() < f64::EPSILON {
            60.0 * ((g - b) / delta).rem_euclid(6.0)
        } else if (max - g).abs() < f64::EPSILON {
            60.0 * ((b - r) / delta + 2.0)
        } else {
            60.0 * ((r - g) / delta + 4.0)
        };
        let s = if max == 0.0 { 0.0 } else { delta / max };
        Hsv { h, s, v: max }
    }

    /// Interpret a JSON target as a color.
    ///
    /// Accepts `[r, g, b]`, `"#rrggbb"`, `{"r", "g", "b"}` and `{"h", "s", "v"}`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidColor`] for any other shape.
    pub fn from_target(target: &Value) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidColor(target.to_string());
        match target {
            Value::String(hex) => Self::from_hex(hex),
            Value::Array(items) if items.len() == 3 => {
                let mut channels = [0u8; 3];
                for (slot, item) in channels.iter_mut().zip(items) {
                    *slot = item
                        .as_u64()
                        .and_then(|n| u8::try_from(n).ok())
                        .ok_or_else(invalid)?;
                }
                Ok(Self::rgb(channels[0], channels[1], channels[2]))
            }
            Value::Object(map) if map.contains_key("h") => {
                serde_json::from_value::<Hsv>(target.clone())
                    .map(Self::from_hsv)
                    .map_err(|_| invalid())
            }
            Value::Object(_) => serde_json::from_value(target.clone()).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_channel(unit: f64) -> u8 {
    (unit * 255.0).round().clamp(0.0, 255.0) as u8
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{},{}]", self.r, self.g, self.b)
    }
}
