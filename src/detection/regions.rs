//! Flat region segmentation
//!
//! Splits a display-encoded image into connected regions of near-constant
//! color:
//! - A pixel is flat when its central-difference gradient stays below a
//!   tolerance in every channel
//! - Neighbouring flat pixels are merged (union-find) when their colors
//!   differ by at most a per-channel tolerance
//! - Each region keeps its first and second spatial moments and mean color
//!
//! Checker patches show up as compact, nearly square regions; the card body,
//! background and clutter produce large, ragged or elongated ones.

use image::RgbImage;

/// Disjoint-set forest over pixel indices
struct UnionFind {
    parent: Vec<u32>,
    size: Vec<u32>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n as u32).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut i: u32) -> u32 {
        while self.parent[i as usize] != i {
            let grandparent = self.parent[self.parent[i as usize] as usize];
            self.parent[i as usize] = grandparent;
            i = grandparent;
        }
        i
    }

    fn union(&mut self, a: u32, b: u32) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        let (big, small) = if self.size[ra as usize] >= self.size[rb as usize] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[small as usize] = big;
        self.size[big as usize] += self.size[small as usize];
    }
}

/// Statistics of one connected flat region
#[derive(Debug, Clone, PartialEq)]
pub struct FlatRegion {
    /// Number of pixels
    pub pixel_count: u32,
    /// Centre of mass (x, y) in pixel coordinates
    pub centroid: (f64, f64),
    /// Spatial covariance (xx, xy, yy)
    pub covariance: (f64, f64, f64),
    /// Mean display color (0-255)
    pub mean_color: [f32; 3],
    /// Bounding box (x0, y0, x1, y1), inclusive
    pub bbox: (u32, u32, u32, u32),
}

impl FlatRegion {
    /// Eigenvalues of the spatial covariance, largest first
    pub fn principal_variances(&self) -> (f64, f64) {
        let (xx, xy, yy) = self.covariance;
        let half_trace = 0.5 * (xx + yy);
        let disc = (0.25 * (xx - yy) * (xx - yy) + xy * xy).sqrt();
        (half_trace + disc, (half_trace - disc).max(0.0))
    }

    /// Ratio of the long to the short principal axis
    pub fn aspect_ratio(&self) -> f64 {
        let (l1, l2) = self.principal_variances();
        if l2 <= f64::EPSILON {
            return f64::INFINITY;
        }
        (l1 / l2).sqrt()
    }

    /// Pixel count over the area of the rectangle with the same second
    /// moments; 1.0 for a solid rectangle at any rotation
    pub fn fill_ratio(&self) -> f64 {
        let (l1, l2) = self.principal_variances();
        let equivalent_area = 12.0 * (l1 * l2).sqrt();
        if equivalent_area <= f64::EPSILON {
            return 0.0;
        }
        self.pixel_count as f64 / equivalent_area
    }

    /// Side of the square with the same area
    pub fn side(&self) -> f64 {
        (self.pixel_count as f64).sqrt()
    }
}

#[derive(Default, Clone)]
struct Accumulator {
    n: u64,
    sx: f64,
    sy: f64,
    sxx: f64,
    sxy: f64,
    syy: f64,
    color: [u64; 3],
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

impl Accumulator {
    fn add(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        if self.n == 0 {
            (self.x0, self.y0, self.x1, self.y1) = (x, y, x, y);
        } else {
            self.x0 = self.x0.min(x);
            self.y0 = self.y0.min(y);
            self.x1 = self.x1.max(x);
            self.y1 = self.y1.max(y);
        }
        let (fx, fy) = (x as f64, y as f64);
        self.n += 1;
        self.sx += fx;
        self.sy += fy;
        self.sxx += fx * fx;
        self.sxy += fx * fy;
        self.syy += fy * fy;
        for c in 0..3 {
            self.color[c] += rgb[c] as u64;
        }
    }

    fn finish(&self) -> FlatRegion {
        let n = self.n as f64;
        let (mx, my) = (self.sx / n, self.sy / n);
        FlatRegion {
            pixel_count: self.n as u32,
            centroid: (mx, my),
            covariance: (
                self.sxx / n - mx * mx,
                self.sxy / n - mx * my,
                self.syy / n - my * my,
            ),
            mean_color: [
                self.color[0] as f32 / n as f32,
                self.color[1] as f32 / n as f32,
                self.color[2] as f32 / n as f32,
            ],
            bbox: (self.x0, self.y0, self.x1, self.y1),
        }
    }
}

/// Mark pixels whose local gradient is below the tolerance in every channel.
/// The one-pixel image border is never flat.
fn flat_mask(image: &RgbImage, gradient_tolerance: u16) -> Vec<bool> {
    let (w, h) = image.dimensions();
    let mut mask = vec![false; (w as usize) * (h as usize)];
    if w < 3 || h < 3 {
        return mask;
    }

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let left = image.get_pixel(x - 1, y).0;
            let right = image.get_pixel(x + 1, y).0;
            let up = image.get_pixel(x, y - 1).0;
            let down = image.get_pixel(x, y + 1).0;
            let flat = (0..3).all(|c| {
                let gx = (right[c] as i16 - left[c] as i16).unsigned_abs();
                let gy = (down[c] as i16 - up[c] as i16).unsigned_abs();
                gx + gy <= gradient_tolerance
            });
            mask[(y * w + x) as usize] = flat;
        }
    }
    mask
}

fn similar(a: [u8; 3], b: [u8; 3], tolerance: u8) -> bool {
    (0..3).all(|c| a[c].abs_diff(b[c]) <= tolerance)
}

/// Segment an image into flat regions of at least `min_pixels` pixels
///
/// # Arguments
///
/// * `image` - Display-encoded image
/// * `color_tolerance` - Largest per-channel step between merged neighbours
/// * `gradient_tolerance` - Largest |dx| + |dy| for a pixel to be flat
/// * `min_pixels` - Regions smaller than this are discarded
pub fn segment_flat_regions(
    image: &RgbImage,
    color_tolerance: u8,
    gradient_tolerance: u16,
    min_pixels: u32,
) -> Vec<FlatRegion> {
    let (w, h) = image.dimensions();
    let mask = flat_mask(image, gradient_tolerance);
    let mut forest = UnionFind::new(mask.len());

    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            if !mask[idx as usize] {
                continue;
            }
            let here = image.get_pixel(x, y).0;
            if x + 1 < w
                && mask[(idx + 1) as usize]
                && similar(here, image.get_pixel(x + 1, y).0, color_tolerance)
            {
                forest.union(idx, idx + 1);
            }
            if y + 1 < h
                && mask[(idx + w) as usize]
                && similar(here, image.get_pixel(x, y + 1).0, color_tolerance)
            {
                forest.union(idx, idx + w);
            }
        }
    }

    let mut slot_of_root: Vec<u32> = vec![u32::MAX; mask.len()];
    let mut accumulators: Vec<Accumulator> = Vec::new();
    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            if !mask[idx as usize] {
                continue;
            }
            let root = forest.find(idx) as usize;
            if forest.size[root] < min_pixels {
                continue;
            }
            if slot_of_root[root] == u32::MAX {
                slot_of_root[root] = accumulators.len() as u32;
                accumulators.push(Accumulator::default());
            }
            accumulators[slot_of_root[root] as usize].add(x, y, image.get_pixel(x, y).0);
        }
    }

    accumulators.iter().map(Accumulator::finish).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn two_squares() -> RgbImage {
        RgbImage::from_fn(60, 30, |x, y| {
            if (5..25).contains(&x) && (5..25).contains(&y) {
                Rgb([200, 40, 40])
            } else if (35..55).contains(&x) && (5..25).contains(&y) {
                Rgb([40, 40, 200])
            } else {
                Rgb([128, 128, 128])
            }
        })
    }

    #[test]
    fn test_union_find_merges() {
        let mut uf = UnionFind::new(5);
        uf.union(0, 1);
        uf.union(3, 4);
        uf.union(1, 4);
        assert_eq!(uf.find(0), uf.find(3));
        assert_ne!(uf.find(0), uf.find(2));
        let root = uf.find(0) as usize;
        assert_eq!(uf.size[root], 4);
    }

    #[test]
    fn test_segments_squares_and_background() {
        let regions = segment_flat_regions(&two_squares(), 6, 14, 16);
        assert_eq!(regions.len(), 3);

        let red = regions
            .iter()
            .find(|r| r.mean_color == [200.0, 40.0, 40.0])
            .unwrap();
        // Edge pixels are not flat, so the interior is 18x18
        assert_eq!(red.pixel_count, 18 * 18);
        assert!((red.centroid.0 - 14.5).abs() < 1e-9);
        assert!((red.centroid.1 - 14.5).abs() < 1e-9);
        assert!((red.aspect_ratio() - 1.0).abs() < 1e-9);
        assert!((red.fill_ratio() - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_min_pixels_discards_small_regions() {
        let regions = segment_flat_regions(&two_squares(), 6, 14, 400);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].mean_color, [128.0, 128.0, 128.0]);
    }

    #[test]
    fn test_noisy_image_has_no_flat_regions() {
        let image = RgbImage::from_fn(40, 40, |x, y| {
            let v = ((x * 97 + y * 57) % 251) as u8;
            Rgb([v, v.wrapping_mul(3), v.wrapping_add(90)])
        });
        assert!(segment_flat_regions(&image, 6, 14, 16).is_empty());
    }

    #[test]
    fn test_elongated_region_shape() {
        let mut acc = Accumulator::default();
        for y in 0..4 {
            for x in 0..40 {
                acc.add(x, y, [0, 0, 0]);
            }
        }
        let bar = acc.finish();
        assert!(bar.aspect_ratio() > 5.0);
        assert!((bar.fill_ratio() - 1.0).abs() < 0.1);
        assert_eq!(bar.bbox, (0, 0, 39, 3));
    }

    #[test]
    fn test_tiny_image() {
        let image = RgbImage::new(2, 2);
        assert!(segment_flat_regions(&image, 6, 14, 1).is_empty());
    }
}
