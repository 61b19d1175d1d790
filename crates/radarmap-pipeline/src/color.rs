//! Reference colors and tolerance-based color equality.
//!
//! Every classification in the pipeline (background detection, grid-line
//! detection, legend membership) compares pixels against a small set of
//! reference colors. Anti-aliasing and lossy re-encoding shift colors by
//! a few units, so equality is always a Manhattan distance over the four
//! RGBA channels compared against a per-call-site tolerance.
//!
//! The tables themselves are plain configuration: a [`ColorModel`] is
//! built once (usually via [`Default`]) and passed by reference into each
//! stage.

use image::Rgba;
use serde::{Deserialize, Serialize};

/// Fully transparent black, the fill for pixels with no source data.
pub const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Marker painted at the projected earth center when requested.
pub const CENTER_MARKER: Rgba<u8> = Rgba([255, 0, 255, 255]);

/// Serde support for `image::Rgba<u8>` as a `[r, g, b, a]` array.
///
/// `image` does not implement serde traits for its pixel types.
mod rgba_serde {
    use image::Rgba;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(color: &Rgba<u8>, serializer: S) -> Result<S::Ok, S::Error> {
        color.0.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Rgba<u8>, D::Error> {
        <[u8; 4]>::deserialize(deserializer).map(Rgba)
    }
}

/// Same as [`rgba_serde`] for a list of colors.
mod rgba_vec_serde {
    use image::Rgba;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(colors: &[Rgba<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        let raw: Vec<[u8; 4]> = colors.iter().map(|c| c.0).collect();
        raw.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Rgba<u8>>, D::Error> {
        let raw = Vec::<[u8; 4]>::deserialize(deserializer)?;
        Ok(raw.into_iter().map(Rgba).collect())
    }
}

/// Sum of absolute per-channel differences between two pixels.
#[must_use]
pub fn channel_distance(a: Rgba<u8>, b: Rgba<u8>) -> u32 {
    a.0.iter()
        .zip(b.0.iter())
        .map(|(&x, &y)| u32::from(x.abs_diff(y)))
        .sum()
}

/// Tolerant color equality: the channel distance is strictly below `eps`.
///
/// With `eps == 0` nothing compares equal, not even identical colors.
#[must_use]
pub fn colors_equal(a: Rgba<u8>, b: Rgba<u8>, eps: u32) -> bool {
    channel_distance(a, b) < eps
}

/// Color tolerances used by the different classifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tolerances {
    /// Legend membership and exact-ink checks.
    pub exact: u32,
    /// Background, grid line and stencil-ink heuristics.
    pub loose: u32,
    /// Stencil check for the bad palette color, which shares its hue
    /// with rendered roads.
    pub road: u32,
}

impl Tolerances {
    /// Default tight tolerance.
    pub const DEFAULT_EXACT: u32 = 2;
    /// Default loose tolerance.
    pub const DEFAULT_LOOSE: u32 = 10;
    /// Default road tolerance.
    pub const DEFAULT_ROAD: u32 = 50;
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            exact: Self::DEFAULT_EXACT,
            loose: Self::DEFAULT_LOOSE,
            road: Self::DEFAULT_ROAD,
        }
    }
}

/// Legend palette of the source rendering, generated from the radar
/// legend.
pub const DEFAULT_PALETTE: [[u8; 4]; 19] = [
    [0, 0, 95, 255],
    [0, 0, 255, 255],
    [0, 68, 136, 255],
    [0, 102, 204, 255],
    [0, 152, 0, 255],
    [90, 194, 0, 255],
    [95, 63, 63, 255],
    [116, 0, 0, 255],
    [127, 85, 255, 255],
    [127, 170, 255, 255],
    [128, 255, 255, 255],
    [147, 255, 70, 255],
    [177, 170, 156, 255],
    [199, 0, 199, 255],
    [255, 56, 1, 255],
    [255, 85, 255, 255],
    [255, 136, 62, 255],
    [255, 170, 255, 255],
    [255, 198, 162, 255],
];

/// Palette entry that coincides with the color of rendered roads.
///
/// It is kept where it already appears but never used as a fill.
pub const DEFAULT_BAD_COLOR: [u8; 4] = [0, 68, 136, 255];

/// Reference colors, palette and tolerances for one source rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorModel {
    /// Scanner background outside the rendered map.
    #[serde(with = "rgba_serde")]
    pub background_outer: Rgba<u8>,
    /// Background inside the rendered map.
    #[serde(with = "rgba_serde")]
    pub background_inner: Rgba<u8>,
    /// Grid line color.
    #[serde(with = "rgba_serde")]
    pub line: Rgba<u8>,
    /// Marker painted on the seam between map and surrounding chrome.
    #[serde(with = "rgba_serde")]
    pub boundary: Rgba<u8>,
    /// Intentional black ink.
    #[serde(with = "rgba_serde")]
    pub black: Rgba<u8>,
    /// Legend colors considered correct map content.
    #[serde(with = "rgba_vec_serde")]
    pub palette: Vec<Rgba<u8>>,
    /// Palette member that is never used as a replacement fill.
    #[serde(with = "rgba_serde")]
    pub bad_color: Rgba<u8>,
    /// Comparison tolerances.
    pub tolerances: Tolerances,
}

impl Default for ColorModel {
    fn default() -> Self {
        Self {
            background_outer: Rgba([164, 160, 160, 255]),
            background_inner: Rgba([208, 208, 208, 255]),
            line: Rgba([115, 115, 115, 255]),
            boundary: Rgba([128, 0, 0, 255]),
            black: Rgba([0, 0, 0, 255]),
            palette: DEFAULT_PALETTE.into_iter().map(Rgba).collect(),
            bad_color: Rgba(DEFAULT_BAD_COLOR),
            tolerances: Tolerances::default(),
        }
    }
}

impl ColorModel {
    /// Whether `color` matches any palette entry within the tight
    /// tolerance.
    #[must_use]
    pub fn is_palette_color(&self, color: Rgba<u8>) -> bool {
        self.palette
            .iter()
            .any(|&p| colors_equal(p, color, self.tolerances.exact))
    }

    /// Whether `color` may be used to fill a replaced pixel.
    ///
    /// The bad color is excluded by exact equality only, so a pixel a
    /// unit or two away from it still qualifies.
    #[must_use]
    pub fn is_replacement_candidate(&self, color: Rgba<u8>) -> bool {
        self.is_palette_color(color) && color != self.bad_color
    }

    /// Scanner background outside the map (loose tolerance).
    #[must_use]
    pub fn is_outer_background(&self, color: Rgba<u8>) -> bool {
        colors_equal(color, self.background_outer, self.tolerances.loose)
    }

    /// Map-interior background (loose tolerance).
    #[must_use]
    pub fn is_inner_background(&self, color: Rgba<u8>) -> bool {
        colors_equal(color, self.background_inner, self.tolerances.loose)
    }

    /// Grid line (loose tolerance).
    #[must_use]
    pub fn is_line(&self, color: Rgba<u8>) -> bool {
        colors_equal(color, self.line, self.tolerances.loose)
    }

    /// Check the model's internal invariants.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated invariant: the
    /// palette must be non-empty and must contain the bad color.
    pub fn validate(&self) -> Result<(), String> {
        if self.palette.is_empty() {
            return Err("palette must contain at least one color".to_owned());
        }
        if !self.palette.contains(&self.bad_color) {
            return Err(format!(
                "bad color {:?} is not a palette member",
                self.bad_color.0
            ));
        }
        Ok(())
    }
}
