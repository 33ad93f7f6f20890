//! Reference palettes of supported checker cards
//!
//! Certified patch colors are stored as 8-bit sRGB in canonical patch order
//! and decoded to linear light once, on first use.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use palette::LinSrgb;
use serde::{Deserialize, Serialize};

use crate::color::conversion::ColorSpace;
use crate::{CalibrationError, Result};

/// Supported checker card types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardType {
    /// Datacolor SpyderCheckr 24, 4 rows x 6 columns
    #[default]
    Spyder24,
}

impl CardType {
    /// Identifier used at the string boundary
    pub fn id(&self) -> &'static str {
        match self {
            CardType::Spyder24 => "spyder24",
        }
    }

    pub fn palette(&self) -> &'static ReferencePalette {
        match self {
            CardType::Spyder24 => &SPYDER24,
        }
    }
}

impl fmt::Display for CardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for CardType {
    type Err = CalibrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "spyder24" => Ok(CardType::Spyder24),
            _ => Err(CalibrationError::invalid_config("card", s)),
        }
    }
}

/// One certified patch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferencePatch {
    /// Position in canonical row-major order
    pub index: usize,
    pub name: &'static str,
    /// Certified value as 8-bit sRGB
    pub srgb8: [u8; 3],
    /// Certified value in linear light
    pub color: LinSrgb,
}

/// Certified colors of one card type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferencePalette {
    pub card: CardType,
    pub rows: usize,
    pub cols: usize,
    /// Index of the neutral patch used as white balance anchor
    pub neutral_index: usize,
    pub patches: Vec<ReferencePatch>,
}

impl ReferencePalette {
    fn from_table(card: CardType, rows: usize, cols: usize, neutral_index: usize, table: &[(&'static str, [u8; 3])]) -> Self {
        let patches = table
            .iter()
            .enumerate()
            .map(|(index, &(name, srgb8))| ReferencePatch {
                index,
                name,
                srgb8,
                color: ColorSpace::decode_rgb8(srgb8),
            })
            .collect();
        Self {
            card,
            rows,
            cols,
            neutral_index,
            patches,
        }
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ReferencePatch> {
        self.patches.get(index)
    }

    pub fn neutral(&self) -> &ReferencePatch {
        &self.patches[self.neutral_index]
    }

    /// Linear reference colors in index order
    pub fn colors(&self) -> Vec<LinSrgb> {
        self.patches.iter().map(|p| p.color).collect()
    }

    /// Reject exclusion indices that do not name a patch of this card
    pub fn validate_exclusions(&self, excluded: &BTreeSet<usize>) -> Result<()> {
        match excluded.iter().find(|&&i| i >= self.len()) {
            Some(&bad) => Err(CalibrationError::invalid_config(
                "excluded",
                format!("{} (card {} has patches 0-{})", bad, self.card, self.len() - 1),
            )),
            None => Ok(()),
        }
    }
}

/// SpyderCheckr 24, darkest patch first: the grey ramp fills row 0
const SPYDER24_TABLE: [(&str, [u8; 3]); 24] = [
    ("black", [43, 41, 43]),
    ("dark grey", [80, 80, 78]),
    ("neutral grey", [122, 118, 116]),
    ("light grey", [161, 157, 154]),
    ("pale grey", [202, 198, 195]),
    ("white", [249, 242, 238]),
    ("primary blue", [25, 55, 135]),
    ("primary green", [57, 146, 64]),
    ("primary red", [186, 26, 51]),
    ("primary yellow", [245, 205, 0]),
    ("primary magenta", [192, 75, 145]),
    ("primary cyan", [0, 127, 159]),
    ("orange", [238, 158, 25]),
    ("yellow green", [157, 188, 54]),
    ("purple", [83, 58, 106]),
    ("moderate red", [195, 79, 95]),
    ("purplish blue", [58, 88, 159]),
    ("orange yellow", [222, 118, 32]),
    ("dark skin", [112, 76, 60]),
    ("light skin", [197, 145, 125]),
    ("blue sky", [87, 120, 155]),
    ("foliage", [82, 106, 60]),
    ("blue flower", [126, 125, 174]),
    ("bluish green", [98, 187, 166]),
];

static SPYDER24: LazyLock<ReferencePalette> =
    LazyLock::new(|| ReferencePalette::from_table(CardType::Spyder24, 4, 6, 2, &SPYDER24_TABLE));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_card_type() {
        assert_eq!("spyder24".parse::<CardType>().unwrap(), CardType::Spyder24);
        assert_eq!(" Spyder24 ".parse::<CardType>().unwrap(), CardType::Spyder24);
        let err = "macbeth".parse::<CardType>().unwrap_err();
        assert!(matches!(err, CalibrationError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_spyder24_layout() {
        let palette = CardType::Spyder24.palette();
        assert_eq!(palette.len(), palette.rows * palette.cols);
        assert_eq!(palette.neutral().name, "neutral grey");
        for (i, patch) in palette.patches.iter().enumerate() {
            assert_eq!(patch.index, i);
        }
    }

    #[test]
    fn test_grey_ramp_is_ordered_and_neutral() {
        let palette = CardType::Spyder24.palette();
        let ramp: Vec<f32> = palette.patches[..6]
            .iter()
            .map(|p| ColorSpace::luminance(p.color))
            .collect();
        assert!(ramp.windows(2).all(|w| w[0] < w[1]));
        for patch in &palette.patches[..6] {
            let [r, g, b] = patch.srgb8;
            assert!(r.abs_diff(g) < 10 && g.abs_diff(b) < 10, "{} is not neutral", patch.name);
        }
    }

    #[test]
    fn test_black_is_the_darkest_corner() {
        let palette = CardType::Spyder24.palette();
        let corners = [0, palette.cols - 1, palette.len() - palette.cols, palette.len() - 1];
        let darkest = corners
            .iter()
            .min_by(|&&a, &&b| {
                ColorSpace::luminance(palette.patches[a].color)
                    .total_cmp(&ColorSpace::luminance(palette.patches[b].color))
            })
            .copied();
        assert_eq!(darkest, Some(0));
    }

    #[test]
    fn test_colors_are_linear() {
        let palette = CardType::Spyder24.palette();
        let grey = palette.neutral().color;
        // 8-bit code 122 decodes to about 0.195
        assert!((grey.red - 0.1946).abs() < 1e-3);
    }

    #[test]
    fn test_exclusion_validation() {
        let palette = CardType::Spyder24.palette();
        assert!(palette.validate_exclusions(&BTreeSet::from([0, 3, 23])).is_ok());
        let err = palette.validate_exclusions(&BTreeSet::from([3, 24])).unwrap_err();
        assert!(err.to_string().contains("24"));
    }
}
