use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A display mode (resolution + refresh rate) of an output
///
/// Accepted on the wire either as an object or as its textual form
/// (`"1920x1080"`, `"1920x1080@60"`, `"1920x1080@59.951Hz"`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ModeRepr")]
pub struct Mode {
    /// Width in pixels
    pub width: i64,
    /// Height in pixels
    pub height: i64,
    /// Refresh rate in Hz, `0.0` when unspecified
    pub refresh: f64,
    /// Aspect ratio hint reported by the compositor, empty when unknown
    pub picture_aspect_ratio: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModeParseError {
    #[error("invalid mode '{0}': expected <width>x<height>[@<refresh>]")]
    Format(String),
    #[error("invalid mode '{0}': {1}")]
    Number(String, String),
}

impl Mode {
    /// Create a mode without an aspect ratio hint; `refresh` is in Hz
    pub fn new(width: i64, height: i64, refresh: f64) -> Self {
        Self {
            width,
            height,
            refresh,
            picture_aspect_ratio: String::new(),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.refresh != 0.0 {
            write!(f, "{}x{}@{}", self.width, self.height, self.refresh)
        } else {
            write!(f, "{}x{}", self.width, self.height)
        }
    }
}

impl FromStr for Mode {
    type Err = ModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let number_err = |e: &dyn fmt::Display| ModeParseError::Number(s.to_string(), e.to_string());

        let (size, refresh) = match s.split_once('@') {
            Some((size, refresh)) => (size, Some(refresh)),
            None => (s, None),
        };

        let refresh = match refresh {
            Some(r) => {
                let r = r.trim_end_matches("Hz");
                r.parse::<f64>().map_err(|e| number_err(&e))?
            }
            None => 0.0,
        };

        let (width, height) = size
            .split_once('x')
            .ok_or_else(|| ModeParseError::Format(s.to_string()))?;
        let width = width.parse::<i64>().map_err(|e| number_err(&e))?;
        let height = height.parse::<i64>().map_err(|e| number_err(&e))?;

        Ok(Mode::new(width, height, refresh))
    }
}

#[derive(Deserialize)]
struct ModeFields {
    width: i64,
    height: i64,
    #[serde(default)]
    refresh: f64,
    #[serde(default)]
    picture_aspect_ratio: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ModeRepr {
    Fields(ModeFields),
    Text(String),
}

impl TryFrom<ModeRepr> for Mode {
    type Error = ModeParseError;

    fn try_from(repr: ModeRepr) -> Result<Self, Self::Error> {
        match repr {
            ModeRepr::Fields(f) => Ok(Mode {
                width: f.width,
                height: f.height,
                refresh: f.refresh,
                picture_aspect_ratio: f.picture_aspect_ratio.unwrap_or_default(),
            }),
            ModeRepr::Text(s) => s.parse(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn textual_form_omits_zero_refresh() {
        assert_eq!(Mode::new(1920, 1080, 0.0).to_string(), "1920x1080");
        assert_eq!(Mode::new(1920, 1080, 60.0).to_string(), "1920x1080@60");
        assert_eq!(Mode::new(2560, 1440, 59.951).to_string(), "2560x1440@59.951");
    }

    #[test]
    fn parses_textual_form() {
        assert_eq!("1920x1080".parse::<Mode>(), Ok(Mode::new(1920, 1080, 0.0)));
        assert_eq!("1280x720@50".parse::<Mode>(), Ok(Mode::new(1280, 720, 50.0)));
        assert_eq!(
            "3840x2160@29.97Hz".parse::<Mode>(),
            Ok(Mode::new(3840, 2160, 29.97))
        );
    }

    #[test]
    fn rejects_malformed_modes() {
        assert!(matches!("1920".parse::<Mode>(), Err(ModeParseError::Format(_))));
        assert!(matches!("axb".parse::<Mode>(), Err(ModeParseError::Number(..))));
        assert!(matches!("1920x1080@fast".parse::<Mode>(), Err(ModeParseError::Number(..))));
    }

    #[test]
    fn deserializes_object_and_string() {
        let from_object: Mode = serde_json::from_str(
            r#"{"width":1920,"height":1080,"refresh":60.0,"picture_aspect_ratio":"16:9"}"#,
        )
        .unwrap();
        assert_eq!(from_object.picture_aspect_ratio, "16:9");
        assert_eq!(from_object.refresh, 60.0);

        let from_text: Mode = serde_json::from_str(r#""1920x1080@60""#).unwrap();
        assert_eq!(from_text.width, 1920);
        assert_eq!(from_text.refresh, 60.0);

        assert!(serde_json::from_str::<Mode>(r#""wide""#).is_err());
    }

    #[test]
    fn serializes_as_object() {
        let json = serde_json::to_value(Mode::new(800, 600, 0.0)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "width": 800,
                "height": 600,
                "refresh": 0.0,
                "picture_aspect_ratio": ""
            })
        );
    }
}
