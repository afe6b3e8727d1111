//! Distance measures and the conversion of angular quantities to physical ones.

use crate::models::{ComponentPhysical, RadioBlock, SourcePhysical};
use crate::wcs::{ARCMIN_PER_DEGREE, ARCSEC_PER_DEGREE};

/// Speed of light in km/s
const SPEED_OF_LIGHT_KMS: f64 = 299_792.458;
pub const METRES_PER_KPC: f64 = 3.0857e19;
/// mJy to W m⁻² Hz⁻¹
const WATTS_PER_MJY: f64 = 1e-29;

/// Redshift-dependent distance measures.
pub trait DistanceModel {
    fn angular_diameter_distance_kpc(&self, z: f64) -> f64;

    fn luminosity_distance_m(&self, z: f64) -> f64;
}

/// Flat ΛCDM, radiation ignored.
#[derive(Debug, Clone, Copy)]
pub struct FlatLambdaCdm {
    /// km/s/Mpc
    pub h0: f64,
    pub omega_m: f64,
}

impl FlatLambdaCdm {
    pub fn planck13() -> Self {
        Self {
            h0: 67.77,
            omega_m: 0.30712,
        }
    }

    /// Line-of-sight comoving distance in Mpc (composite Simpson's rule).
    pub fn comoving_distance_mpc(&self, z: f64) -> f64 {
        if z <= 0.0 {
            return 0.0;
        }
        const STEPS: usize = 1000;
        let omega_l = 1.0 - self.omega_m;
        let inv_e = |zp: f64| 1.0 / (self.omega_m * (1.0 + zp).powi(3) + omega_l).sqrt();

        let h = z / STEPS as f64;
        let mut sum = inv_e(0.0) + inv_e(z);
        for i in 1..STEPS {
            let weight = if i % 2 == 1 { 4.0 } else { 2.0 };
            sum += weight * inv_e(i as f64 * h);
        }
        SPEED_OF_LIGHT_KMS / self.h0 * sum * h / 3.0
    }
}

impl DistanceModel for FlatLambdaCdm {
    fn angular_diameter_distance_kpc(&self, z: f64) -> f64 {
        self.comoving_distance_mpc(z) / (1.0 + z) * 1000.0
    }

    fn luminosity_distance_m(&self, z: f64) -> f64 {
        self.comoving_distance_mpc(z) * (1.0 + z) * 1000.0 * METRES_PER_KPC
    }
}

/// Cubic fit to log10 D_A, valid for roughly 0.01 < z < 3.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPolynomialApprox;

impl DistanceModel for LogPolynomialApprox {
    fn angular_diameter_distance_kpc(&self, z: f64) -> f64 {
        if z <= 0.0 {
            return 0.0;
        }
        let l = z.log10();
        10f64.powf(-0.0799 * l.powi(3) - 0.406 * l.powi(2) + 0.3101 * l + 3.2239) * 1000.0
    }

    fn luminosity_distance_m(&self, z: f64) -> f64 {
        self.angular_diameter_distance_kpc(z) * (1.0 + z).powi(2) * METRES_PER_KPC
    }
}

/// Fill in the physical blocks of a radio measurement at redshift `z`.
///
/// Returns false (and leaves the block untouched) unless `z > 0`.
pub fn apply_physical(radio: &mut RadioBlock, z: f64, model: &dyn DistanceModel) -> bool {
    if z.is_nan() || z <= 0.0 {
        return false;
    }
    let da_kpc = model.angular_diameter_distance_kpc(z);
    let dl_m = model.luminosity_distance_m(z);
    let luminosity =
        |flux_mjy: f64| flux_mjy * WATTS_PER_MJY * 4.0 * std::f64::consts::PI * dl_m * dl_m;
    let kpc_per_arcmin = da_kpc * (1.0 / ARCMIN_PER_DEGREE).to_radians();
    let kpc2_per_arcsec2 = (da_kpc * (1.0 / ARCSEC_PER_DEGREE).to_radians()).powi(2);

    for component in &mut radio.components {
        component.physical = Some(ComponentPhysical {
            physical_extent: component.angular_extent * kpc_per_arcmin,
            cross_section: component.solid_angle * kpc2_per_arcsec2,
            luminosity: luminosity(component.flux),
            luminosity_err: luminosity(component.flux_err),
        });
    }
    for peak in &mut radio.peaks {
        peak.luminosity = Some(luminosity(peak.flux));
    }
    radio.physical = Some(SourcePhysical {
        redshift: z,
        max_physical_extent: radio.max_angular_extent * kpc_per_arcmin,
        total_cross_section: radio.total_solid_angle * kpc2_per_arcsec2,
        total_luminosity: luminosity(radio.total_flux),
        total_luminosity_err: luminosity(radio.total_flux_err),
        peak_luminosity_err: luminosity(radio.peak_flux_err),
    });
    true
}
