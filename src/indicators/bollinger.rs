// =============================================================================
// Bollinger Bands
// =============================================================================
//
// middle = SMA(period)
// upper  = middle + k * σ        lower = middle - k * σ
// width  = (upper - lower) / middle * 100
//
// σ is the population standard deviation over the window. Defined from
// index `period - 1`.
// =============================================================================

use super::{undefined, Series};

/// The four Bollinger series, all input-length.
#[derive(Debug, Clone)]
pub struct BollingerSeries {
    pub upper: Series,
    pub middle: Series,
    pub lower: Series,
    pub width: Series,
}

pub fn bollinger(closes: &[f64], period: usize, num_std: f64) -> BollingerSeries {
    let len = closes.len();
    let mut bands = BollingerSeries {
        upper: undefined(len),
        middle: undefined(len),
        lower: undefined(len),
        width: undefined(len),
    };

    if period == 0 || len < period {
        return bands;
    }

    for i in (period - 1)..len {
        let window = &closes[i + 1 - period..=i];
        let mean: f64 = window.iter().sum::<f64>() / period as f64;
        if !mean.is_finite() || mean == 0.0 {
            continue;
        }

        let variance = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / period as f64;
        let std_dev = variance.sqrt();

        let upper = mean + num_std * std_dev;
        let lower = mean - num_std * std_dev;
        let width = (upper - lower) / mean * 100.0;
        if !width.is_finite() {
            continue;
        }

        bands.upper[i] = Some(upper);
        bands.middle[i] = Some(mean);
        bands.lower[i] = Some(lower);
        bands.width[i] = Some(width);
    }

    bands
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::last_value;

    #[test]
    fn bollinger_insufficient_data() {
        let b = bollinger(&[1.0, 2.0, 3.0], 20, 2.0);
        assert!(b.middle.iter().all(Option::is_none));
    }

    #[test]
    fn bollinger_warmup_boundary() {
        let closes: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        let b = bollinger(&closes, 20, 2.0);
        assert!(b.middle[18].is_none());
        assert!(b.middle[19].is_some());
    }

    #[test]
    fn bands_bracket_the_mean() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.5).sin() * 3.0).collect();
        let b = bollinger(&closes, 20, 2.0);
        for i in 19..40 {
            let (u, m, l) = (
                b.upper[i].unwrap(),
                b.middle[i].unwrap(),
                b.lower[i].unwrap(),
            );
            assert!(u >= m && m >= l);
        }
    }

    #[test]
    fn flat_series_has_zero_width() {
        let closes = vec![100.0; 25];
        let b = bollinger(&closes, 20, 2.0);
        assert_eq!(last_value(&b.width), Some(0.0));
        assert_eq!(last_value(&b.upper), last_value(&b.lower));
    }

    #[test]
    fn known_population_stddev() {
        // Window [2, 4, 4, 4, 5, 5, 7, 9]: mean 5, population σ = 2.
        let closes = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let b = bollinger(&closes, 8, 2.0);
        assert_eq!(b.middle[7], Some(5.0));
        assert_eq!(b.upper[7], Some(9.0));
        assert_eq!(b.lower[7], Some(1.0));
    }

    #[test]
    fn width_scales_with_volatility() {
        let calm: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.5).sin() * 0.5).collect();
        let wild: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.5).sin() * 8.0).collect();
        let calm_width = last_value(&bollinger(&calm, 20, 2.0).width).unwrap();
        let wild_width = last_value(&bollinger(&wild, 20, 2.0).width).unwrap();
        assert!(wild_width > calm_width);
    }
}
