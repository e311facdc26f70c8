//! Defines the `Parameter` enum, mapping the MOSMIX element codes this crate tracks
//! to descriptive variants.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A forecast parameter tracked from the MOSMIX bundle.
///
/// Each variant maps to the `elementName` attribute code used upstream. See the
/// [DWD parameter list](https://dwd-geoportal.de/products/G_FJM/) for the full catalogue;
/// only the five parameters below are extracted, everything else in the bundle is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Parameter {
    /// `Rad1h`: global irradiance over the last hour (kJ/m²).
    #[serde(rename = "Rad1h")]
    Irradiance,
    /// `SunD1`: sunshine duration during the last hour (s).
    #[serde(rename = "SunD1")]
    Sunshine,
    /// `Neff`: effective cloud cover (%).
    #[serde(rename = "Neff")]
    CloudCover,
    /// `wwM`: probability for fog within the last hour (%).
    #[serde(rename = "wwM")]
    FogProbability,
    /// `VV`: visibility (m).
    #[serde(rename = "VV")]
    Visibility,
}

impl Parameter {
    /// All tracked parameters, in a stable order.
    pub const ALL: [Parameter; 5] = [
        Parameter::Irradiance,
        Parameter::Sunshine,
        Parameter::CloudCover,
        Parameter::FogProbability,
        Parameter::Visibility,
    ];

    /// The upstream element code, e.g. `"Rad1h"`.
    pub fn code(&self) -> &'static str {
        match self {
            Parameter::Irradiance => "Rad1h",
            Parameter::Sunshine => "SunD1",
            Parameter::CloudCover => "Neff",
            Parameter::FogProbability => "wwM",
            Parameter::Visibility => "VV",
        }
    }

    /// Looks up a tracked parameter by its upstream element code. Codes are case-sensitive.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.code() == code)
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
