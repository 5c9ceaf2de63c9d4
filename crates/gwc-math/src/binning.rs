//! Compactified logarithmic binning.
//!
//! `AtanLogBins` maps the whole of (0, ∞) onto a finite number of bins by
//! taking the arctangent of the log coordinate, so the density surfaces
//! can extend to arbitrarily large SNR with bounded memory. Resolution is
//! concentrated in a configured `[lo, hi]` range; bins become
//! progressively coarser (and the two extreme bins semi-infinite) outside
//! it.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Logarithmically spaced bins compactified over (0, ∞).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtanLogBins {
    pub lo: f64,
    pub hi: f64,
    pub count: usize,
    /// centre of the transform in log coordinates
    mid: f64,
    /// half-width of the high-resolution region in log coordinates
    half: f64,
}

impl AtanLogBins {
    pub fn new(lo: f64, hi: f64, count: usize) -> Self {
        assert!(lo > 0.0 && hi > lo && count >= 2, "invalid binning");
        let (ln_lo, ln_hi) = (lo.ln(), hi.ln());
        AtanLogBins {
            lo,
            hi,
            count,
            mid: 0.5 * (ln_lo + ln_hi),
            half: 0.5 * (ln_hi - ln_lo),
        }
    }

    /// Unit-interval coordinate of `x`. Monotone; 0 and 1 are the images
    /// of 0 and +∞.
    fn unit(&self, x: f64) -> f64 {
        if x <= 0.0 {
            return 0.0;
        }
        ((x.ln() - self.mid) / self.half).atan() / PI + 0.5
    }

    /// Index of the bin containing `x`.
    pub fn index(&self, x: f64) -> usize {
        let i = (self.unit(x) * self.count as f64).floor() as isize;
        i.clamp(0, self.count as isize - 1) as usize
    }

    /// Lower edge of bin `i` (0 for the first bin).
    pub fn lower(&self, i: usize) -> f64 {
        if i == 0 {
            return 0.0;
        }
        self.invert(i as f64 / self.count as f64)
    }

    /// Upper edge of bin `i` (+∞ for the last bin).
    pub fn upper(&self, i: usize) -> f64 {
        if i + 1 >= self.count {
            return f64::INFINITY;
        }
        self.invert((i + 1) as f64 / self.count as f64)
    }

    /// Geometric centre of bin `i` in the compactified coordinate.
    pub fn centre(&self, i: usize) -> f64 {
        self.invert((i as f64 + 0.5) / self.count as f64)
    }

    /// Width of bin `i`; infinite for the two extreme bins.
    pub fn width(&self, i: usize) -> f64 {
        self.upper(i) - self.lower(i)
    }

    fn invert(&self, u: f64) -> f64 {
        (self.mid + self.half * (PI * (u - 0.5)).tan()).exp()
    }
}

/// Outer product of two `AtanLogBins`, row-major storage convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bins2d {
    pub x: AtanLogBins,
    pub y: AtanLogBins,
}

impl Bins2d {
    pub fn new(x: AtanLogBins, y: AtanLogBins) -> Self {
        Bins2d { x, y }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.x.count, self.y.count)
    }

    pub fn len(&self) -> usize {
        self.x.count * self.y.count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat index of the bin containing `(x, y)`.
    pub fn flat_index(&self, x: f64, y: f64) -> usize {
        self.x.index(x) * self.y.count + self.y.index(y)
    }

    /// Area of the bin at `(i, j)`; infinite on the boundary bins.
    pub fn area(&self, i: usize, j: usize) -> f64 {
        self.x.width(i) * self.y.width(j)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_is_monotone() {
        let bins = AtanLogBins::new(2.6, 26.0, 300);
        let mut last = 0;
        for k in 1..1000 {
            let x = 0.1 * k as f64;
            let i = bins.index(x);
            assert!(i >= last, "index not monotone at x={x}");
            last = i;
        }
    }

    #[test]
    fn test_extremes_clamp() {
        let bins = AtanLogBins::new(2.6, 26.0, 300);
        assert_eq!(bins.index(0.0), 0);
        assert_eq!(bins.index(-1.0), 0);
        assert_eq!(bins.index(1e300), bins.count - 1);
    }

    #[test]
    fn test_edges_bracket_centre() {
        let bins = AtanLogBins::new(0.001, 0.2, 280);
        for i in [1, 50, 140, 278] {
            let (lo, c, hi) = (bins.lower(i), bins.centre(i), bins.upper(i));
            assert!(lo < c && c < hi, "bin {i}: {lo} {c} {hi}");
            assert_eq!(bins.index(c), i);
        }
    }

    #[test]
    fn test_boundary_bins_semi_infinite() {
        let bins = AtanLogBins::new(2.6, 26.0, 300);
        assert_eq!(bins.lower(0), 0.0);
        assert!(bins.upper(bins.count - 1).is_infinite());
        assert!(bins.width(0).is_finite()); // lower edge is 0, upper finite
        assert!(bins.width(bins.count - 1).is_infinite());
    }

    #[test]
    fn test_interior_resolution_concentrated() {
        let bins = AtanLogBins::new(2.6, 26.0, 300);
        // bins near SNR 8 should be much narrower than bins near SNR 1000
        let w8 = bins.width(bins.index(8.0));
        let w1000 = bins.width(bins.index(1000.0));
        assert!(w8 < w1000);
    }

    #[test]
    fn test_flat_index_round_trip() {
        let b = Bins2d::new(
            AtanLogBins::new(2.6, 26.0, 300),
            AtanLogBins::new(0.001, 0.2, 280),
        );
        let k = b.flat_index(8.0, 0.02);
        assert_eq!(k, b.x.index(8.0) * 280 + b.y.index(0.02));
        assert!(k < b.len());
    }
}
