//! Binary mask morphology and boundary extraction.

use image::GrayImage;

use crate::detect::result::BoundingRegion;

/// Value of a set pixel in a binary mask.
pub const MASK_ON: u8 = 255;

/// Threshold a difference image into a binary mask. Pixels strictly above `cutoff` are set.
pub fn threshold(diff: &GrayImage, cutoff: u8) -> GrayImage {
    let (width, height) = diff.dimensions();
    let data = diff
        .as_raw()
        .iter()
        .map(|&v| if v > cutoff { MASK_ON } else { 0 })
        .collect();
    GrayImage::from_raw(width, height, data).unwrap_or_else(|| GrayImage::new(width, height))
}

/// Dilate with a 3x3 square structuring element, `iterations` times.
///
/// Repeated 3x3 dilation equals one pass with a square of radius `iterations`, done here as
/// two separable max filters.
pub fn dilate(mask: &GrayImage, iterations: u32) -> GrayImage {
    if iterations == 0 {
        return mask.clone();
    }
    let (width, height) = mask.dimensions();
    let (w, h) = (width as usize, height as usize);
    let r = iterations as usize;
    let src = mask.as_raw();

    let mut horizontal = vec![0u8; w * h];
    for y in 0..h {
        let row = &src[y * w..(y + 1) * w];
        for x in 0..w {
            let lo = x.saturating_sub(r);
            let hi = (x + r).min(w - 1);
            horizontal[y * w + x] = row[lo..=hi].iter().copied().max().unwrap_or(0);
        }
    }

    let mut out = vec![0u8; w * h];
    for x in 0..w {
        for y in 0..h {
            let lo = y.saturating_sub(r);
            let hi = (y + r).min(h - 1);
            out[y * w + x] = (lo..=hi).map(|yy| horizontal[yy * w + x]).max().unwrap_or(0);
        }
    }

    GrayImage::from_raw(width, height, out).unwrap_or_else(|| GrayImage::new(width, height))
}

/// Extract the outer boundary of every 8-connected region of set pixels.
///
/// A region's area is the area enclosed by its outer boundary: its own pixels plus any holes,
/// so an outline counts as much as the solid shape it surrounds. Regions lying inside another
/// region's holes are not external and are skipped. Regions are returned in raster order of
/// their first (top-most, then left-most) pixel.
pub fn external_regions(mask: &GrayImage) -> Vec<BoundingRegion> {
    let (width, height) = mask.dimensions();
    let (w, h) = (width as usize, height as usize);
    let data = mask.as_raw();
    let mut visited = vec![false; w * h];
    let mut enclosed = vec![false; w * h];
    let mut regions = Vec::new();
    let mut stack = Vec::new();
    let mut pixels = Vec::new();

    for start in 0..w * h {
        if data[start] == 0 || visited[start] {
            continue;
        }
        visited[start] = true;
        stack.push(start);
        pixels.clear();

        let (mut min_x, mut min_y) = (start % w, start / w);
        let (mut max_x, mut max_y) = (min_x, min_y);

        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % w, idx / w);
            pixels.push(idx);
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);

            for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    let n = ny * w + nx;
                    if data[n] != 0 && !visited[n] {
                        visited[n] = true;
                        stack.push(n);
                    }
                }
            }
        }

        // An enclosing region always starts on an earlier row, so its fill is already marked.
        if enclosed[start] {
            continue;
        }

        let extent = Extent {
            min_x,
            min_y,
            max_x,
            max_y,
        };
        let area = fill_interior(&pixels, extent, w, &mut enclosed);
        regions.push(BoundingRegion {
            x: min_x as u32,
            y: min_y as u32,
            width: extent.width() as u32,
            height: extent.height() as u32,
            area,
        });
    }

    regions
}

#[derive(Clone, Copy)]
struct Extent {
    min_x: usize,
    min_y: usize,
    max_x: usize,
    max_y: usize,
}

impl Extent {
    fn width(&self) -> usize {
        self.max_x - self.min_x + 1
    }

    fn height(&self) -> usize {
        self.max_y - self.min_y + 1
    }
}

const OPEN: u8 = 0;
const WALL: u8 = 1;
const OUTSIDE: u8 = 2;

/// Count the pixels inside a region's outer boundary and mark them in `enclosed`.
///
/// Works on a local copy of the extent with a one-pixel margin. Everything the margin reaches
/// through 4-connected steps is outside; the rest is the region or one of its holes.
fn fill_interior(pixels: &[usize], extent: Extent, stride: usize, enclosed: &mut [bool]) -> u64 {
    let gw = extent.width() + 2;
    let gh = extent.height() + 2;
    let mut grid = vec![OPEN; gw * gh];
    for &idx in pixels {
        let (x, y) = (idx % stride, idx / stride);
        grid[(y - extent.min_y + 1) * gw + (x - extent.min_x + 1)] = WALL;
    }

    // 4-connected so the fill cannot slip between diagonally touching boundary pixels.
    grid[0] = OUTSIDE;
    let mut stack = vec![0usize];
    while let Some(i) = stack.pop() {
        let (x, y) = (i % gw, i / gw);
        let neighbours = [
            (x > 0).then(|| i - 1),
            (x + 1 < gw).then(|| i + 1),
            (y > 0).then(|| i - gw),
            (y + 1 < gh).then(|| i + gw),
        ];
        for n in neighbours.into_iter().flatten() {
            if grid[n] == OPEN {
                grid[n] = OUTSIDE;
                stack.push(n);
            }
        }
    }

    let mut area = 0u64;
    for gy in 1..gh - 1 {
        for gx in 1..gw - 1 {
            if grid[gy * gw + gx] != OUTSIDE {
                area += 1;
                let x = gx - 1 + extent.min_x;
                let y = gy - 1 + extent.min_y;
                enclosed[y * stride + x] = true;
            }
        }
    }
    area
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_with(width: u32, height: u32, on: &[(u32, u32)]) -> GrayImage {
        let mut mask = GrayImage::new(width, height);
        for &(x, y) in on {
            mask.put_pixel(x, y, image::Luma([MASK_ON]));
        }
        mask
    }

    #[test]
    fn threshold_is_strict() {
        let diff = GrayImage::from_raw(3, 1, vec![24, 25, 26]).unwrap();
        let mask = threshold(&diff, 25);
        assert_eq!(mask.as_raw(), &vec![0, 0, MASK_ON]);
    }

    #[test]
    fn dilate_grows_single_pixel_by_iterations() {
        let mask = mask_with(11, 11, &[(5, 5)]);
        let grown = dilate(&mask, 2);
        let regions = external_regions(&grown);
        assert_eq!(regions.len(), 1);
        assert_eq!(
            regions[0],
            BoundingRegion {
                x: 3,
                y: 3,
                width: 5,
                height: 5,
                area: 25
            }
        );
    }

    #[test]
    fn dilate_merges_nearby_blobs() {
        let mask = mask_with(20, 5, &[(5, 2), (9, 2)]);
        assert_eq!(external_regions(&mask).len(), 2);
        assert_eq!(external_regions(&dilate(&mask, 2)).len(), 1);
    }

    #[test]
    fn diagonal_pixels_are_connected() {
        let mask = mask_with(4, 4, &[(0, 0), (1, 1), (2, 2)]);
        let regions = external_regions(&mask);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].width, 3);
        assert_eq!(regions[0].area, 3);
    }

    #[test]
    fn regions_follow_raster_order() {
        let mask = mask_with(10, 10, &[(8, 1), (1, 6), (5, 3)]);
        let xs: Vec<u32> = external_regions(&mask).iter().map(|r| r.x).collect();
        assert_eq!(xs, vec![8, 5, 1]);
    }

    #[test]
    fn outline_area_includes_its_hole() {
        let mut on = Vec::new();
        for i in 2..12 {
            on.extend([(i, 2), (i, 11), (2, i), (11, i)]);
        }
        let regions = external_regions(&mask_with(14, 14, &on));
        assert_eq!(regions.len(), 1);
        assert_eq!((regions[0].width, regions[0].height), (10, 10));
        assert_eq!(regions[0].area, 100);
    }

    #[test]
    fn diagonal_outline_is_closed() {
        // A diamond drawn with diagonal steps still encloses its centre.
        let on = [(2, 0), (1, 1), (3, 1), (0, 2), (4, 2), (1, 3), (3, 3), (2, 4)];
        let regions = external_regions(&mask_with(5, 5, &on));
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].area, 13);
    }

    #[test]
    fn open_shapes_are_not_filled() {
        // A U shape: the gap in the top edge lets the outside in.
        let mut on = Vec::new();
        for i in 1..8 {
            on.extend([(1, i), (7, i), (i, 7)]);
        }
        let regions = external_regions(&mask_with(9, 9, &on));
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].area, 19);
    }

    #[test]
    fn regions_inside_a_hole_are_not_external() {
        let mut on = vec![(6, 6)];
        for i in 2..11 {
            on.extend([(i, 2), (i, 10), (2, i), (10, i)]);
        }
        let regions = external_regions(&mask_with(13, 13, &on));
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].area, 81);
    }

    #[test]
    fn empty_mask_has_no_regions() {
        assert!(external_regions(&GrayImage::new(16, 16)).is_empty());
    }
}
