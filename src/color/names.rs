//! Nearest named color lookup
//!
//! Maps an arbitrary display color to the perceptually closest entry of a
//! fixed name table. The default table is the xkcd color survey.

use std::sync::LazyLock;

use palette::Lab;

use crate::color::conversion::ColorSpace;

mod xkcd;

static XKCD_MATCHER: LazyLock<NamedColorMatcher> = LazyLock::new(|| {
    NamedColorMatcher::from_entries(
        xkcd::XKCD_COLORS
            .iter()
            .map(|&(name, code)| (name, unpack(code))),
    )
});

fn unpack(code: u32) -> [u8; 3] {
    [(code >> 16) as u8, (code >> 8) as u8, code as u8]
}

/// A name table with Lab coordinates precomputed
///
/// Lookup is a linear scan with CIEDE2000; fine for interactive queries, but
/// callers classifying every pixel of an image should cache results.
#[derive(Debug, Clone)]
pub struct NamedColorMatcher {
    entries: Vec<NamedEntry>,
}

#[derive(Debug, Clone)]
struct NamedEntry {
    name: &'static str,
    rgb: [u8; 3],
    lab: Lab,
}

impl NamedColorMatcher {
    /// Build a matcher from `(name, sRGB code)` pairs, keeping their order
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, [u8; 3])>,
    {
        let entries = entries
            .into_iter()
            .map(|(name, rgb)| NamedEntry {
                name,
                rgb,
                lab: ColorSpace::srgb8_to_lab([rgb[0] as f32, rgb[1] as f32, rgb[2] as f32]),
            })
            .collect();
        Self { entries }
    }

    /// Shared matcher over the xkcd color survey (949 names)
    pub fn xkcd() -> &'static NamedColorMatcher {
        &XKCD_MATCHER
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Closest entry to a 0-255 display color, with its CIEDE2000 distance
    ///
    /// Ties keep the entry that comes first in the table. Returns `None` only
    /// for an empty table.
    pub fn closest_with_distance(&self, rgb: [f32; 3]) -> Option<(&'static str, f32)> {
        let target = ColorSpace::srgb8_to_lab(rgb);

        let mut best: Option<(&'static str, f32)> = None;
        for entry in &self.entries {
            let distance = ColorSpace::lab_distance(target, entry.lab);
            match best {
                Some((_, d)) if distance >= d => {}
                _ => best = Some((entry.name, distance)),
            }
        }
        best
    }

    /// Name of the closest entry to a 0-255 display color
    pub fn closest(&self, rgb: [f32; 3]) -> Option<&'static str> {
        self.closest_with_distance(rgb).map(|(name, _)| name)
    }

    /// sRGB code stored for a name, if present
    pub fn color_of(&self, name: &str) -> Option<[u8; 3]> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.rgb)
    }
}

/// Name of the xkcd survey color closest to a 0-255 display color
///
/// Accepts the mean returned by [`get_average_color`](crate::color::get_average_color).
/// Returns `None` only if the table is empty, which the xkcd table never is.
pub fn closest_name(rgb: [f32; 3]) -> Option<&'static str> {
    NamedColorMatcher::xkcd().closest(rgb)
}
