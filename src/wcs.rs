//! World coordinate solution for radio survey cutouts.
//!
//! TAN (gnomonic) projection only, which covers both FIRST and ATLAS cutouts.
//! Pixel coordinates are 0-indexed FITS pixels (x right, y up).

use nalgebra::{Matrix2, Vector2};

pub const ARCSEC_PER_DEGREE: f64 = 3600.0;
pub const ARCMIN_PER_DEGREE: f64 = 60.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Wcs {
    /// Reference pixel, 0-indexed
    pub crpix: Vector2<f64>,
    /// Reference sky position (RA, Dec) in degrees
    pub crval: Vector2<f64>,
    /// Pixel offset to intermediate world coordinates, degrees per pixel
    pub cd: Matrix2<f64>,
}

impl Wcs {
    pub fn new(crpix: (f64, f64), crval: (f64, f64), cd: [[f64; 2]; 2]) -> Self {
        Self {
            crpix: Vector2::new(crpix.0, crpix.1),
            crval: Vector2::new(crval.0, crval.1),
            cd: Matrix2::new(cd[0][0], cd[0][1], cd[1][0], cd[1][1]),
        }
    }

    /// Build from FITS header keywords. Uses the CD matrix when present and
    /// falls back to CDELT/CROTA2 otherwise.
    pub fn from_header<F>(mut get_keyword: F) -> Option<Self>
    where
        F: FnMut(&str) -> Option<f64>,
    {
        // FITS CRPIX is 1-indexed
        let crpix1 = get_keyword("CRPIX1")? - 1.0;
        let crpix2 = get_keyword("CRPIX2")? - 1.0;
        let crval1 = get_keyword("CRVAL1")?;
        let crval2 = get_keyword("CRVAL2")?;

        let cd = if let (Some(cd1_1), Some(cd1_2), Some(cd2_1), Some(cd2_2)) = (
            get_keyword("CD1_1"),
            get_keyword("CD1_2"),
            get_keyword("CD2_1"),
            get_keyword("CD2_2"),
        ) {
            [[cd1_1, cd1_2], [cd2_1, cd2_2]]
        } else {
            let cdelt1 = get_keyword("CDELT1")?;
            let cdelt2 = get_keyword("CDELT2")?;
            let (sin_r, cos_r) = get_keyword("CROTA2").unwrap_or(0.0).to_radians().sin_cos();
            [
                [cdelt1 * cos_r, -cdelt2 * sin_r],
                [cdelt1 * sin_r, cdelt2 * cos_r],
            ]
        };

        let wcs = Self::new((crpix1, crpix2), (crval1, crval2), cd);
        if wcs.cd.determinant().abs() < f64::EPSILON * 1e-6 {
            return None;
        }
        Some(wcs)
    }

    /// Pixel to (RA, Dec) in degrees, RA normalised to [0, 360).
    pub fn pixel_to_sky(&self, x: f64, y: f64) -> (f64, f64) {
        let offset = Vector2::new(x, y) - self.crpix;
        let intermediate = self.cd * offset;
        let xi = intermediate.x.to_radians();
        let eta = intermediate.y.to_radians();

        let ra0 = self.crval.x.to_radians();
        let (sin_dec0, cos_dec0) = self.crval.y.to_radians().sin_cos();
        let denom = cos_dec0 - eta * sin_dec0;

        let ra = ra0 + xi.atan2(denom);
        let dec = (sin_dec0 + eta * cos_dec0).atan2((xi * xi + denom * denom).sqrt());

        (ra.to_degrees().rem_euclid(360.0), dec.to_degrees())
    }

    /// Mean pixel scale in arcsec per pixel.
    pub fn pixel_scale_arcsec(&self) -> f64 {
        let scale_x = (self.cd[(0, 0)].powi(2) + self.cd[(1, 0)].powi(2)).sqrt();
        let scale_y = (self.cd[(0, 1)].powi(2) + self.cd[(1, 1)].powi(2)).sqrt();
        (scale_x + scale_y) / 2.0 * ARCSEC_PER_DEGREE
    }

    /// Solid angle of one pixel in arcsec².
    pub fn pixel_area_arcsec2(&self) -> f64 {
        self.cd.determinant().abs() * ARCSEC_PER_DEGREE * ARCSEC_PER_DEGREE
    }
}

/// Great-circle separation between two sky positions, in degrees (Vincenty formula).
pub fn angular_separation(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    let delta_ra = (ra2 - ra1).to_radians();
    let (sin_dec1, cos_dec1) = dec1.to_radians().sin_cos();
    let (sin_dec2, cos_dec2) = dec2.to_radians().sin_cos();
    let (sin_dra, cos_dra) = delta_ra.sin_cos();

    let term1 = (cos_dec2 * sin_dra).powi(2);
    let term2 = (cos_dec1 * sin_dec2 - sin_dec1 * cos_dec2 * cos_dra).powi(2);
    let numerator = (term1 + term2).sqrt();
    let denominator = sin_dec1 * sin_dec2 + cos_dec1 * cos_dec2 * cos_dra;

    numerator.atan2(denominator).to_degrees()
}

pub fn angular_separation_arcmin(a: (f64, f64), b: (f64, f64)) -> f64 {
    angular_separation(a.0, a.1, b.0, b.1) * ARCMIN_PER_DEGREE
}

pub fn angular_separation_arcsec(a: (f64, f64), b: (f64, f64)) -> f64 {
    angular_separation(a.0, a.1, b.0, b.1) * ARCSEC_PER_DEGREE
}

#[cfg(test)]
pub(crate) fn test_wcs(width: usize, height: usize) -> Wcs {
    // FIRST-like: 1.8"/pixel, RA increasing to the left
    let scale = 1.8 / ARCSEC_PER_DEGREE;
    Wcs::new(
        (width as f64 / 2.0, height as f64 / 2.0),
        (150.0, 30.0),
        [[-scale, 0.0], [0.0, scale]],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_pixel_maps_to_crval() {
        let wcs = test_wcs(132, 132);
        let (ra, dec) = wcs.pixel_to_sky(66.0, 66.0);
        assert!((ra - 150.0).abs() < 1e-12);
        assert!((dec - 30.0).abs() < 1e-12);
    }

    /// Gnomonic inverse of `pixel_to_sky`.
    fn sky_to_pixel(wcs: &Wcs, ra: f64, dec: f64) -> Option<(f64, f64)> {
        let (sin_dec, cos_dec) = dec.to_radians().sin_cos();
        let (sin_dec0, cos_dec0) = wcs.crval.y.to_radians().sin_cos();
        let (sin_dra, cos_dra) = (ra - wcs.crval.x).to_radians().sin_cos();

        let d = sin_dec * sin_dec0 + cos_dec * cos_dec0 * cos_dra;
        if d <= 0.0 {
            return None;
        }
        let xi = (cos_dec * sin_dra / d).to_degrees();
        let eta = ((sin_dec * cos_dec0 - cos_dec * sin_dec0 * cos_dra) / d).to_degrees();

        let offset = wcs.cd.try_inverse()? * Vector2::new(xi, eta);
        Some((wcs.crpix.x + offset.x, wcs.crpix.y + offset.y))
    }

    #[test]
    fn test_round_trip_pixel_sky() {
        let wcs = test_wcs(132, 132);
        for &(x, y) in &[(0.0, 0.0), (131.0, 5.0), (40.5, 99.25)] {
            let (ra, dec) = wcs.pixel_to_sky(x, y);
            let (px, py) = sky_to_pixel(&wcs, ra, dec).unwrap();
            assert!((px - x).abs() < 1e-6, "x {} -> {}", x, px);
            assert!((py - y).abs() < 1e-6, "y {} -> {}", y, py);
        }
    }

    #[test]
    fn test_pixel_scale() {
        let wcs = test_wcs(132, 132);
        assert!((wcs.pixel_scale_arcsec() - 1.8).abs() < 1e-9);
        assert!((wcs.pixel_area_arcsec2() - 3.24).abs() < 1e-9);
    }

    #[test]
    fn test_from_header_cdelt_fallback() {
        let wcs = Wcs::from_header(|key| match key {
            "CRPIX1" => Some(67.0),
            "CRPIX2" => Some(67.0),
            "CRVAL1" => Some(10.0),
            "CRVAL2" => Some(-5.0),
            "CDELT1" => Some(-0.0005),
            "CDELT2" => Some(0.0005),
            _ => None,
        })
        .unwrap();
        assert_eq!(wcs.crpix, Vector2::new(66.0, 66.0));
        assert!((wcs.cd[(0, 0)] + 0.0005).abs() < 1e-15);
        assert!(wcs.cd[(0, 1)].abs() < 1e-15);
    }

    #[test]
    fn test_from_header_missing_keywords() {
        assert!(Wcs::from_header(|key| match key {
            "CRPIX1" => Some(1.0),
            _ => None,
        })
        .is_none());
    }

    #[test]
    fn test_angular_separation() {
        assert!((angular_separation(0.0, 0.0, 1.0, 0.0) - 1.0).abs() < 1e-12);
        assert!((angular_separation(10.0, 89.0, 190.0, 89.0) - 2.0).abs() < 1e-9);
        assert_eq!(angular_separation(45.0, 12.0, 45.0, 12.0), 0.0);
        let arcsec = angular_separation_arcsec((150.0, 30.0), (150.0, 30.0 + 1.0 / 3600.0));
        assert!((arcsec - 1.0).abs() < 1e-6);
    }
}
