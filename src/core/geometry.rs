use crate::core::common::MdStoreError;
use crate::core::dimension::Dimension;
use serde::{Deserialize, Serialize};

/// One axis-aligned interval `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub min: f64,
    pub max: f64,
}

impl Interval {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    /// Lower bound of slab `i` when this interval is cut into `factor` equal slabs.
    /// Slab `factor` is the interval's own upper bound, so the last slab ends exactly on it.
    fn slab_edge(&self, i: usize, factor: usize) -> f64 {
        if i >= factor {
            self.max
        } else {
            #[allow(clippy::cast_precision_loss)]
            let fraction = i as f64 / factor as f64;
            self.min + self.width() * fraction
        }
    }
}

/// N-dimensional box extents, or a query region.
///
/// As box extents every interval is half-open; as a query region the intervals are
/// treated as closed (see [`Extents::intersects_region`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extents {
    intervals: Vec<Interval>,
}

impl Extents {
    pub fn new(intervals: Vec<Interval>) -> Self {
        Self { intervals }
    }

    pub fn from_ranges(ranges: &[(f64, f64)]) -> Self {
        Self { intervals: ranges.iter().map(|&(lo, hi)| Interval::new(lo, hi)).collect() }
    }

    pub fn from_dimensions(dimensions: &[Dimension]) -> Self {
        Self { intervals: dimensions.iter().map(|d| Interval::new(d.min, d.max)).collect() }
    }

    pub fn nd(&self) -> usize {
        self.intervals.len()
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn volume(&self) -> f64 {
        self.intervals.iter().map(Interval::width).product()
    }

    pub fn center(&self) -> Vec<f64> {
        self.intervals.iter().map(|iv| (iv.min + iv.max) / 2.0).collect()
    }

    /// Check if the extents are valid (min < max and finite in every dimension)
    pub fn is_valid(&self) -> bool {
        !self.intervals.is_empty()
            && self.intervals.iter().all(|iv| iv.min.is_finite() && iv.max.is_finite() && iv.min < iv.max)
    }

    /// Half-open containment: `min <= x < max` in every dimension.
    pub fn contains_point(&self, coords: &[f64]) -> bool {
        coords.len() == self.intervals.len()
            && self.intervals.iter().zip(coords).all(|(iv, &x)| iv.min <= x && x < iv.max)
    }

    /// Check if these extents lie entirely inside `other`.
    pub fn is_within(&self, other: &Extents) -> bool {
        self.nd() == other.nd()
            && self
                .intervals
                .iter()
                .zip(&other.intervals)
                .all(|(a, b)| b.min <= a.min && a.max <= b.max)
    }

    /// True when these half-open box extents share at least one point with the closed
    /// query `region`.
    pub fn intersects_region(&self, region: &Extents) -> bool {
        self.nd() == region.nd()
            && self
                .intervals
                .iter()
                .zip(&region.intervals)
                .all(|(b, r)| b.min <= r.max && r.min < b.max)
    }

    /// Slab index of `x` along `dim` when cut into `factor` slabs, with `[lo, hi)` slabs.
    ///
    /// The estimate from division is corrected against the slab edges actually used by
    /// [`Extents::child`], so an event is always inside the child it is routed to.
    pub fn bucket(&self, dim: usize, x: f64, factor: usize) -> usize {
        let iv = self.intervals[dim];
        let last = factor - 1;
        #[allow(clippy::cast_precision_loss)]
        let scaled = (x - iv.min) / iv.width() * factor as f64;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let mut idx = if scaled <= 0.0 { 0 } else { (scaled.floor() as usize).min(last) };

        if idx > 0 && x < iv.slab_edge(idx, factor) {
            idx -= 1;
        } else if idx < last && x >= iv.slab_edge(idx + 1, factor) {
            idx += 1;
        }
        idx
    }

    /// Row-major child index (dimension 0 varies fastest) of the child containing `coords`.
    pub fn child_index(&self, coords: &[f64], factor: usize) -> usize {
        let mut index = 0;
        let mut stride = 1;
        for (dim, &x) in coords.iter().enumerate().take(self.nd()) {
            index += self.bucket(dim, x, factor) * stride;
            stride *= factor;
        }
        index
    }

    /// Extents of child `index` out of `factor^nd`, matching [`Extents::child_index`].
    pub fn child(&self, index: usize, factor: usize) -> Extents {
        let mut remainder = index;
        let intervals = self
            .intervals
            .iter()
            .map(|iv| {
                let slab = remainder % factor;
                remainder /= factor;
                Interval::new(iv.slab_edge(slab, factor), iv.slab_edge(slab + 1, factor))
            })
            .collect();
        Extents { intervals }
    }

    /// All `factor^nd` child extents in child-index order.
    pub fn children(&self, factor: usize) -> Vec<Extents> {
        let count = checked_children(factor, self.nd()).unwrap_or(0);
        (0..count).map(|i| self.child(i, factor)).collect()
    }
}

/// `factor^nd`, or `None` on overflow.
pub fn checked_children(factor: usize, nd: usize) -> Option<usize> {
    u32::try_from(nd).ok().and_then(|exp| factor.checked_pow(exp))
}

/// Validates a query region against the workspace dimensionality.
pub fn validate_region(region: &Extents, nd: usize) -> Result<(), MdStoreError> {
    if region.nd() != nd {
        return Err(MdStoreError::invalid_input(format!(
            "region has {} dimensions, workspace has {}",
            region.nd(),
            nd
        )));
    }
    if region.intervals.iter().any(|iv| iv.min.is_nan() || iv.max.is_nan() || iv.min > iv.max) {
        return Err(MdStoreError::invalid_input("region intervals must satisfy min <= max"));
    }
    Ok(())
}
