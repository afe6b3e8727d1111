//! Flux, geometry and peak extraction for one source's component trees.

use tracing::debug;

use crate::contour::ContourNode;
use crate::error::ContourError;
use crate::models::{Component, Peak, RadioBlock};
use crate::radio_image::RadioImage;
use crate::wcs::angular_separation_arcmin;

const MJY_PER_JY: f64 = 1000.0;

/// Tunables for edge detection
#[derive(Debug, Clone, Copy)]
pub struct EdgeTolerance {
    pub margin_px: f64,
    pub max_gap_px: f64,
}

impl Default for EdgeTolerance {
    fn default() -> Self {
        Self {
            margin_px: 4.0,
            max_gap_px: 1.0,
        }
    }
}

/// Measure every component tree of one source.
///
/// Returns `Ok(None)` when no tree matched, which callers treat as an entry
/// without radio data.
pub fn measure_source(
    trees: &[ContourNode],
    image: &RadioImage,
    outermost_level: f64,
    edges: EdgeTolerance,
) -> Result<Option<RadioBlock>, ContourError> {
    if trees.is_empty() {
        return Ok(None);
    }

    let sigma = image.noise_sigma();
    let mut components = Vec::with_capacity(trees.len());
    let mut peaks = Vec::new();
    for tree in trees {
        components.push(measure_component(tree, image, sigma, edges)?);
        peaks.extend(find_peaks(tree, image));
    }

    let (ra, dec) = radio_position(&components).unwrap_or_default();
    let total_flux: f64 = components.iter().map(|c| c.flux).sum();
    let total_flux_err = components
        .iter()
        .map(|c| c.flux_err * c.flux_err)
        .sum::<f64>()
        .sqrt();

    Ok(Some(RadioBlock {
        ra,
        dec,
        total_flux,
        total_flux_err,
        outermost_level: outermost_level * MJY_PER_JY,
        number_components: components.len(),
        number_peaks: peaks.len(),
        max_angular_extent: max_angular_extent(&components),
        total_solid_angle: components.iter().map(|c| c.solid_angle).sum(),
        peak_flux_err: sigma * MJY_PER_JY,
        peaks,
        components,
        physical: None,
    }))
}

/// Integrated flux, extent and sky box of one component tree.
pub fn measure_component(
    tree: &ContourNode,
    image: &RadioImage,
    sigma: f64,
    edges: EdgeTolerance,
) -> Result<Component, ContourError> {
    let pixels = image.enclosed_pixels(&tree.vertices);
    let sum: f64 = pixels
        .iter()
        .filter_map(|&(x, y)| image.contour_pixel(x, y))
        .sum();
    let beam_px = image.beam.area_pixels(&image.wcs);

    let flux = MJY_PER_JY * sum / beam_px;
    if flux < 0.0 {
        return Err(ContourError::InvariantViolation(format!(
            "negative integrated flux {:.4} mJy in component at level {}",
            flux, tree.level
        )));
    }
    let flux_err = MJY_PER_JY * sigma * (pixels.len() as f64 / beam_px).sqrt();

    let pixel_box = tree.pixel_box();
    let corner_a = image.contour_to_sky(pixel_box.x_min, pixel_box.y_min);
    let corner_b = image.contour_to_sky(pixel_box.x_max, pixel_box.y_max);

    let pixel_scale = image.wcs.pixel_scale_arcsec();

    Ok(Component {
        flux,
        flux_err,
        angular_extent: angular_separation_arcmin(corner_a, corner_b),
        solid_angle: tree.polygon_area() * pixel_scale * pixel_scale,
        ra_range: [corner_a.0.min(corner_b.0), corner_a.0.max(corner_b.0)],
        dec_range: [corner_a.1.min(corner_b.1), corner_a.1.max(corner_b.1)],
        overedge: tree.is_overedge(image.width, image.height, edges.margin_px, edges.max_gap_px),
        physical: None,
    })
}

/// One peak per qualifying leaf: the brightest pixel inside the leaf ring.
pub fn find_peaks(tree: &ContourNode, image: &RadioImage) -> Vec<Peak> {
    tree.peak_leaves()
        .into_iter()
        .filter_map(|leaf| {
            let brightest = image
                .enclosed_pixels(&leaf.vertices)
                .into_iter()
                .filter_map(|(x, y)| image.contour_pixel(x, y).map(|v| (x, y, v)))
                .max_by(|a, b| a.2.total_cmp(&b.2));

            let (x, y, value) = match brightest {
                Some(found) => found,
                None => {
                    // Ring too small to rasterise
                    let (cx, cy) = leaf.vertex_centroid()?;
                    let (x, y) = (cx.round().max(0.0) as usize, cy.round().max(0.0) as usize);
                    let Some(value) = image.contour_pixel(x, y) else {
                        debug!("no finite pixel under leaf at level {}", leaf.level);
                        return None;
                    };
                    (x, y, value)
                }
            };

            let (ra, dec) = image.contour_to_sky(x as f64, y as f64);
            Some(Peak {
                ra,
                dec,
                flux: value * MJY_PER_JY,
                luminosity: None,
            })
        })
        .collect()
}

/// Largest corner-to-corner separation between distinct components, in arcmin.
///
/// A single component reports its own angular extent.
pub fn max_angular_extent(components: &[Component]) -> f64 {
    match components {
        [] => 0.0,
        [only] => only.angular_extent,
        _ => {
            let mut max = 0.0_f64;
            for (i, a) in components.iter().enumerate() {
                for b in &components[i + 1..] {
                    for corner_a in a.corners() {
                        for corner_b in b.corners() {
                            max = max.max(angular_separation_arcmin(corner_a, corner_b));
                        }
                    }
                }
            }
            max
        }
    }
}

/// Centre of the union of all component sky boxes.
pub fn radio_position(components: &[Component]) -> Option<(f64, f64)> {
    let first = components.first()?;
    let (mut ra0, mut ra1) = (first.ra_range[0], first.ra_range[1]);
    let (mut dec0, mut dec1) = (first.dec_range[0], first.dec_range[1]);
    for c in &components[1..] {
        ra0 = ra0.min(c.ra_range[0]);
        ra1 = ra1.max(c.ra_range[1]);
        dec0 = dec0.min(c.dec_range[0]);
        dec1 = dec1.max(c.dec_range[1]);
    }
    Some(((ra0 + ra1) / 2.0, (dec0 + dec1) / 2.0))
}
