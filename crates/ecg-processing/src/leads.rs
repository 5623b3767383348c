//! Lead derivation from filtered electrode potentials

use ecg_core::{DerivedLeads, FilteredSample};

/// Compute the six limb leads from one filtered (RA, LA, LL) sample.
///
/// Einthoven leads I, II, III and the Goldberger augmented leads aVR, aVL,
/// aVF, evaluated exactly as written with no further rounding.
pub fn derive_leads(sample: &FilteredSample) -> DerivedLeads {
    let FilteredSample { timestamp, ra, la, ll } = *sample;

    DerivedLeads {
        timestamp,
        i: la - ra,
        ii: ll - ra,
        iii: ll - la,
        avr: ra - (la + ll) / 2.0,
        avl: la - (ra + ll) / 2.0,
        avf: ll - (ra + la) / 2.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecg_core::Timestamp;

    fn sample(ra: f64, la: f64, ll: f64) -> FilteredSample {
        FilteredSample::from_channels(Timestamp::from_millis(40), [ra, la, ll])
    }

    #[test]
    fn test_reference_values() {
        let leads = derive_leads(&sample(0.40, 0.55, 0.50));
        assert_eq!(leads.i, 0.55 - 0.40);
        assert_eq!(leads.ii, 0.50 - 0.40);
        assert_eq!(leads.iii, 0.50 - 0.55);
        assert_eq!(leads.avr, 0.40 - (0.55 + 0.50) / 2.0);
        assert_eq!(leads.avl, 0.55 - (0.40 + 0.50) / 2.0);
        assert_eq!(leads.avf, 0.50 - (0.40 + 0.55) / 2.0);
        assert_eq!(leads.timestamp, Timestamp::from_millis(40));
    }

    #[test]
    fn test_einthoven_identity_on_grid() {
        // Values are multiples of 1/8, so every difference is exact
        for a in -16..=16 {
            for b in -16..=16 {
                for c in [-13, -2, 0, 5, 11] {
                    let leads = derive_leads(&sample(a as f64 / 8.0, b as f64 / 8.0, c as f64 / 8.0));
                    assert_eq!(leads.i, leads.ii - leads.iii);
                }
            }
        }
    }

    #[test]
    fn test_einthoven_identity_on_arbitrary_voltages() {
        for n in 0..1_000 {
            let t = n as f64 * 0.013;
            let leads = derive_leads(&sample(0.40 + t.sin(), 0.55 + (1.7 * t).cos(), 0.50 - t.sin() * 0.3));
            // Each subtraction rounds once
            assert!((leads.i - (leads.ii - leads.iii)).abs() <= 8.0 * f64::EPSILON);
        }
    }

    #[test]
    fn test_augmented_leads_sum_to_zero() {
        let leads = derive_leads(&sample(0.25, -0.5, 1.75));
        assert_eq!(leads.avr + leads.avl + leads.avf, 0.0);
    }

    #[test]
    fn test_zero_potentials() {
        let leads = derive_leads(&sample(0.0, 0.0, 0.0));
        assert_eq!(
            [leads.i, leads.ii, leads.iii, leads.avr, leads.avl, leads.avf],
            [0.0; 6]
        );
    }
}
