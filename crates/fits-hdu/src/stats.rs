//! Summary statistics over image pixels.
//!
//! The parallel path splits the image into rows; each row range folds its own
//! [`Partial`] and a single reduce merges them. The median is selected on one
//! thread from a copy of the valid pixels.

use rayon::prelude::*;

use crate::config::CodecOptions;
use crate::image::ImageDataUnit;

/// Statistics of the non-NaN pixels of an image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageStatistics {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub mean: f64,
    /// Sample standard deviation (`n - 1` denominator); 0 for one pixel.
    pub stdev: f64,
    pub median: f64,
}

#[derive(Debug, Clone, Copy)]
struct Partial {
    count: usize,
    min: f64,
    max: f64,
    sum: f64,
}

impl Partial {
    fn empty() -> Self {
        Partial {
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
        }
    }

    fn add_row(mut self, row: &[f64]) -> Self {
        for &v in row.iter().filter(|v| !v.is_nan()) {
            self.count += 1;
            self.min = self.min.min(v);
            self.max = self.max.max(v);
            self.sum += v;
        }
        self
    }

    fn merge(self, other: Partial) -> Self {
        Partial {
            count: self.count + other.count,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
            sum: self.sum + other.sum,
        }
    }
}

fn squared_deviation(row: &[f64], mean: f64) -> f64 {
    row.iter()
        .filter(|v| !v.is_nan())
        .map(|v| (v - mean) * (v - mean))
        .sum()
}

fn median(data: &[f64]) -> f64 {
    let mut valid: Vec<f64> = data.iter().copied().filter(|v| !v.is_nan()).collect();
    let n = valid.len();
    let mid = n / 2;
    let (lower, upper, _) = valid.select_nth_unstable_by(mid, f64::total_cmp);
    let upper = *upper;
    if n % 2 == 1 {
        upper
    } else {
        let below = lower.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (below + upper) / 2.0
    }
}

impl ImageStatistics {
    /// Compute statistics over `data` laid out in rows of `row_len` pixels.
    /// Returns `None` when no pixel is a number.
    pub fn compute(data: &[f64], row_len: usize, options: &CodecOptions) -> Option<Self> {
        let row_len = row_len.max(1);
        let (totals, squares) = if options.parallel {
            options.install(|| {
                let totals = data
                    .par_chunks(row_len)
                    .fold(Partial::empty, Partial::add_row)
                    .reduce(Partial::empty, Partial::merge);
                let mean = totals.sum / totals.count.max(1) as f64;
                let squares: f64 = data
                    .par_chunks(row_len)
                    .map(|row| squared_deviation(row, mean))
                    .sum();
                (totals, squares)
            })
        } else {
            let totals = data.chunks(row_len).fold(Partial::empty(), Partial::add_row);
            let mean = totals.sum / totals.count.max(1) as f64;
            let squares: f64 = data
                .chunks(row_len)
                .map(|row| squared_deviation(row, mean))
                .sum();
            (totals, squares)
        };

        if totals.count == 0 {
            return None;
        }
        let mean = totals.sum / totals.count as f64;
        let stdev = if totals.count > 1 {
            (squares / (totals.count - 1) as f64).sqrt()
        } else {
            0.0
        };
        Some(ImageStatistics {
            count: totals.count,
            min: totals.min,
            max: totals.max,
            sum: totals.sum,
            mean,
            stdev,
            median: median(data),
        })
    }
}

impl ImageDataUnit {
    /// Statistics of this image's pixels, or `None` if it has no valid pixels.
    pub fn statistics(&self, options: &CodecOptions) -> Option<ImageStatistics> {
        ImageStatistics::compute(self.data(), self.width(), options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::precision::DiskPrecision;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn known_values() {
        let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let s = ImageStatistics::compute(&data, 4, &CodecOptions::serial()).unwrap();
        assert_eq!(s.count, 8);
        assert_eq!(s.min, 2.0);
        assert_eq!(s.max, 9.0);
        assert_eq!(s.sum, 40.0);
        assert_eq!(s.mean, 5.0);
        assert!(close(s.stdev, (32.0f64 / 7.0).sqrt()));
        assert_eq!(s.median, 4.5);
    }

    #[test]
    fn odd_count_median() {
        let s = ImageStatistics::compute(&[9.0, 1.0, 5.0], 3, &CodecOptions::default()).unwrap();
        assert_eq!(s.median, 5.0);
    }

    #[test]
    fn nan_pixels_are_excluded() {
        let data = [1.0, f64::NAN, 3.0, f64::NAN];
        let s = ImageStatistics::compute(&data, 2, &CodecOptions::default()).unwrap();
        assert_eq!(s.count, 2);
        assert_eq!(s.mean, 2.0);
        assert_eq!(s.median, 2.0);
        assert_eq!(s.min, 1.0);
    }

    #[test]
    fn no_valid_pixels() {
        assert!(ImageStatistics::compute(&[], 1, &CodecOptions::default()).is_none());
        assert!(ImageStatistics::compute(&[f64::NAN; 4], 2, &CodecOptions::serial()).is_none());
    }

    #[test]
    fn single_pixel_has_zero_stdev() {
        let s = ImageStatistics::compute(&[3.5], 1, &CodecOptions::default()).unwrap();
        assert_eq!(s.stdev, 0.0);
        assert_eq!(s.median, 3.5);
    }

    #[test]
    fn parallel_matches_serial() {
        let (w, h) = (257, 131);
        let data: Vec<f64> = (0..w * h)
            .map(|i| ((i as f64) * 0.37).sin() * 1e4 + (i % 17) as f64)
            .collect();
        let img = ImageDataUnit::from_vec(vec![w, h], data, DiskPrecision::Double).unwrap();
        let threaded = CodecOptions {
            threads: Some(4),
            ..CodecOptions::default()
        };
        let p = img.statistics(&threaded).unwrap();
        let s = img.statistics(&CodecOptions::serial()).unwrap();
        assert_eq!(p.count, s.count);
        assert_eq!(p.min, s.min);
        assert_eq!(p.max, s.max);
        assert_eq!(p.median, s.median);
        assert!(close(p.sum, s.sum));
        assert!(close(p.mean, s.mean));
        assert!(close(p.stdev, s.stdev));
    }
}
