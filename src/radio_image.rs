use anyhow::{Context, Result};
use bumpalo::Bump;
use fitrs::{Fits, FitsData, FitsDataArray, HeaderValue};
use image::{GrayImage, Luma};
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point;
use std::path::Path;

use crate::wcs::{Wcs, ARCSEC_PER_DEGREE};

/// MAD to Gaussian sigma conversion factor
const MAD_TO_SIGMA: f64 = 1.4826;

/// FIRST restoring beam (5.4" circular), used when the header has no BMAJ/BMIN
pub const DEFAULT_BEAM_ARCSEC: f64 = 5.4;

/// Restoring beam, FWHM in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Beam {
    pub major_deg: f64,
    pub minor_deg: f64,
}

impl Beam {
    pub fn circular_arcsec(fwhm: f64) -> Self {
        Self {
            major_deg: fwhm / ARCSEC_PER_DEGREE,
            minor_deg: fwhm / ARCSEC_PER_DEGREE,
        }
    }

    /// Gaussian beam area expressed in pixels of the given WCS.
    pub fn area_pixels(&self, wcs: &Wcs) -> f64 {
        let beam_arcsec2 = std::f64::consts::PI
            * (self.major_deg * ARCSEC_PER_DEGREE)
            * (self.minor_deg * ARCSEC_PER_DEGREE)
            / (4.0 * std::f64::consts::LN_2);
        beam_arcsec2 / wcs.pixel_area_arcsec2()
    }
}

/// A radio survey cutout: Jy/beam pixel data plus its sky calibration.
///
/// `data` is row-major in FITS order: row 0 is the bottom of the image.
pub struct RadioImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f64>,
    pub wcs: Wcs,
    pub beam: Beam,
}

impl RadioImage {
    /// Load a radio cutout with fitrs. Degenerate frequency/Stokes axes are ignored.
    pub fn from_file(path: &Path, default_beam: Beam) -> Result<Self> {
        let fits = Fits::open(path)
            .with_context(|| format!("Failed to open FITS file: {}", path.display()))?;

        let hdu = fits
            .get(0)
            .ok_or_else(|| anyhow::anyhow!("No primary HDU found in FITS file"))?;

        let header_f64 = |key: &str| -> Option<f64> {
            match hdu.value(key) {
                Some(HeaderValue::IntegerNumber(n)) => Some(*n as f64),
                Some(HeaderValue::RealFloatingNumber(f)) => Some(*f),
                _ => None,
            }
        };

        let naxis = header_f64("NAXIS").unwrap_or(0.0) as usize;
        if naxis < 2 {
            return Err(anyhow::anyhow!(
                "FITS file does not contain 2D image data (NAXIS={})",
                naxis
            ));
        }

        let width = header_f64("NAXIS1")
            .ok_or_else(|| anyhow::anyhow!("Missing NAXIS1 header"))? as usize;
        let height = header_f64("NAXIS2")
            .ok_or_else(|| anyhow::anyhow!("Missing NAXIS2 header"))? as usize;

        let wcs = Wcs::from_header(header_f64)
            .ok_or_else(|| anyhow::anyhow!("Missing or singular WCS in {}", path.display()))?;

        let beam = match (header_f64("BMAJ"), header_f64("BMIN")) {
            (Some(major_deg), Some(minor_deg)) if major_deg > 0.0 && minor_deg > 0.0 => Beam {
                major_deg,
                minor_deg,
            },
            _ => default_beam,
        };

        let bscale = header_f64("BSCALE").unwrap_or(1.0);
        let bzero = header_f64("BZERO").unwrap_or(0.0);

        // Blank pixels become NaN and are skipped by every consumer
        let fits_data = hdu.read_data();
        let mut data: Vec<f64> = match &fits_data {
            FitsData::Characters(_) => {
                return Err(anyhow::anyhow!(
                    "FITS file contains character data, not image data"
                ));
            }
            FitsData::IntegersI32(FitsDataArray { data, .. }) => data
                .iter()
                .map(|v| v.map(|raw| raw as f64 * bscale + bzero).unwrap_or(f64::NAN))
                .collect(),
            FitsData::IntegersU32(FitsDataArray { data, .. }) => data
                .iter()
                .map(|v| v.map(|raw| raw as f64 * bscale + bzero).unwrap_or(f64::NAN))
                .collect(),
            FitsData::FloatingPoint32(FitsDataArray { data, .. }) => {
                data.iter().map(|&v| v as f64 * bscale + bzero).collect()
            }
            FitsData::FloatingPoint64(FitsDataArray { data, .. }) => {
                data.iter().map(|&v| v * bscale + bzero).collect()
            }
        };

        if data.len() < width * height {
            return Err(anyhow::anyhow!(
                "Data size mismatch: expected {} pixels, got {}",
                width * height,
                data.len()
            ));
        }
        data.truncate(width * height);

        Ok(RadioImage {
            width,
            height,
            data,
            wcs,
            beam,
        })
    }

    /// Value at a 0-indexed FITS pixel.
    pub fn pixel(&self, x: usize, y: usize) -> Option<f64> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let value = self.data[y * self.width + x];
        value.is_finite().then_some(value)
    }

    /// Convert contour-space coordinates (origin top-left, y down) to FITS pixels.
    pub fn contour_to_fits(&self, x: f64, y: f64) -> (f64, f64) {
        (x, self.height as f64 - 1.0 - y)
    }

    /// Sky position of a contour-space point.
    pub fn contour_to_sky(&self, x: f64, y: f64) -> (f64, f64) {
        let (fx, fy) = self.contour_to_fits(x, y);
        self.wcs.pixel_to_sky(fx, fy)
    }

    /// Image-wide background noise in Jy/beam from the median absolute deviation.
    pub fn noise_sigma(&self) -> f64 {
        let arena = Bump::new();
        let mut sorted = bumpalo::vec![in &arena];
        sorted.extend(self.data.iter().copied().filter(|v| v.is_finite()));
        if sorted.is_empty() {
            return 0.0;
        }
        sorted.sort_by(|a, b| a.total_cmp(b));
        let median = median_of_sorted(&sorted);

        let mut deviations = bumpalo::vec![in &arena];
        deviations.extend(sorted.iter().map(|v| (v - median).abs()));
        deviations.sort_by(|a, b| a.total_cmp(b));

        median_of_sorted(&deviations) * MAD_TO_SIGMA
    }

    /// Contour-space pixel coordinates enclosed by a polygon given in contour space.
    pub fn enclosed_pixels(&self, vertices: &[(f64, f64)]) -> Vec<(usize, usize)> {
        let mut points: Vec<Point<i32>> = Vec::with_capacity(vertices.len());
        for &(x, y) in vertices {
            let point = Point::new(x.round() as i32, y.round() as i32);
            if points.last() != Some(&point) {
                points.push(point);
            }
        }
        // draw_polygon_mut rejects an explicitly closed ring
        while points.len() > 1 && points.first() == points.last() {
            points.pop();
        }
        if points.len() < 3 {
            return Vec::new();
        }

        let mut mask = GrayImage::new(self.width as u32, self.height as u32);
        draw_polygon_mut(&mut mask, &points, Luma([255u8]));

        mask.enumerate_pixels()
            .filter(|(_, _, p)| p[0] > 0)
            .map(|(x, y, _)| (x as usize, y as usize))
            .collect()
    }

    /// Value at a contour-space pixel.
    pub fn contour_pixel(&self, x: usize, y: usize) -> Option<f64> {
        if y >= self.height {
            return None;
        }
        self.pixel(x, self.height - 1 - y)
    }
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
