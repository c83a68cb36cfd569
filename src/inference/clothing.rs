//! Clothing advice from a forecast temperature

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How strongly the user feels cold or heat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    /// Feels colder than the thermometer says
    Cold,
    #[default]
    Normal,
    /// Feels warmer than the thermometer says
    Hot,
}

impl Sensitivity {
    /// Offset applied to the forecast to get the felt temperature, in °C
    pub fn adjustment(self) -> f64 {
        match self {
            Sensitivity::Cold => -2.0,
            Sensitivity::Normal => 0.0,
            Sensitivity::Hot => 2.0,
        }
    }
}

/// Outfit band for a felt temperature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outfit {
    /// 25 °C and above
    ShortSleeves,
    /// 20 to 25 °C
    LightLayers,
    /// 15 to 20 °C
    LongSleevesJacket,
    /// 10 to 15 °C
    SweaterLightPadding,
    /// below 10 °C
    HeavyCoat,
}

impl Outfit {
    pub fn for_temperature(felt: f64) -> Self {
        if felt >= 25.0 {
            Outfit::ShortSleeves
        } else if felt >= 20.0 {
            Outfit::LightLayers
        } else if felt >= 15.0 {
            Outfit::LongSleevesJacket
        } else if felt >= 10.0 {
            Outfit::SweaterLightPadding
        } else {
            Outfit::HeavyCoat
        }
    }

    pub fn advice(self) -> &'static str {
        match self {
            Outfit::ShortSleeves => "short sleeves and cool, light clothing",
            Outfit::LightLayers => "thin long sleeves or short sleeves with a light outer layer",
            Outfit::LongSleevesJacket => "long sleeves with a cardigan or jacket",
            Outfit::SweaterLightPadding => "a sweater or a light padded jacket",
            Outfit::HeavyCoat => "a heavy coat and warm clothing",
        }
    }
}

/// Advice for one forecast temperature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub forecast: f64,
    pub felt: f64,
    pub sensitivity: Sensitivity,
    pub outfit: Outfit,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Forecast {:.1}°C (feels like {:.1}°C for {:?} sensitivity): {}",
            self.forecast,
            self.felt,
            self.sensitivity,
            self.outfit.advice()
        )
    }
}

pub fn recommend(temperature: f64, sensitivity: Sensitivity) -> Recommendation {
    let felt = temperature + sensitivity.adjustment();
    Recommendation {
        forecast: temperature,
        felt,
        sensitivity,
        outfit: Outfit::for_temperature(felt),
    }
}
