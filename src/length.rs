use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

const PX_PER_INCH: f64 = 96.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Px,
    In,
    Cm,
    Mm,
}

impl Unit {
    fn suffix(self) -> &'static str {
        match self {
            Unit::Px => "px",
            Unit::In => "in",
            Unit::Cm => "cm",
            Unit::Mm => "mm",
        }
    }

    fn inches_per_unit(self) -> f64 {
        match self {
            Unit::Px => 1.0 / PX_PER_INCH,
            Unit::In => 1.0,
            Unit::Cm => 1.0 / 2.54,
            Unit::Mm => 1.0 / 25.4,
        }
    }
}

/// A physical length such as `"1cm"`, `"0.5in"` or `"20"` (CSS pixels).
/// Displays as it was written.
#[derive(Debug, Clone, PartialEq)]
pub struct Length {
    value: f64,
    unit: Option<Unit>,
    text: Cow<'static, str>,
}

impl Length {
    pub const ZERO: Length = Length {
        value: 0.0,
        unit: None,
        text: Cow::Borrowed("0"),
    };

    pub fn to_inches(&self) -> f64 {
        self.value * self.unit.unwrap_or(Unit::Px).inches_per_unit()
    }
}

impl Default for Length {
    fn default() -> Self {
        Length::ZERO
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid length {0:?}, expected a non-negative number with an optional px, in, cm or mm suffix")]
pub struct ParseLengthError(String);

impl FromStr for Length {
    type Err = ParseLengthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let lower = trimmed.to_ascii_lowercase();

        let unit = [Unit::Px, Unit::In, Unit::Cm, Unit::Mm]
            .into_iter()
            .find(|unit| lower.ends_with(unit.suffix()));

        let number = match unit {
            Some(unit) => &trimmed[..trimmed.len() - unit.suffix().len()],
            None => trimmed,
        };

        let number = number.trim();
        if number.starts_with('-') {
            return Err(ParseLengthError(s.to_string()));
        }

        let value = number
            .parse::<f64>()
            .map_err(|_| ParseLengthError(s.to_string()))?;

        if !value.is_finite() {
            return Err(ParseLengthError(s.to_string()));
        }

        Ok(Length {
            value,
            unit,
            text: Cow::Owned(trimmed.to_string()),
        })
    }
}

impl fmt::Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
