//! 1-D signal helpers over score series.

/// Edge handling of [`uniform_filter1d`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderMode {
    /// `d c b a | a b c d | d c b a`
    Reflect,
    /// `a a a a | a b c d | d d d d`
    Nearest,
}

fn border_index(i: isize, n: usize, mode: BorderMode) -> usize {
    let n_i = n as isize;
    match mode {
        BorderMode::Nearest => i.clamp(0, n_i - 1) as usize,
        BorderMode::Reflect => {
            let period = 2 * n_i;
            let mut k = i.rem_euclid(period);
            if k >= n_i {
                k = period - 1 - k;
            }
            k as usize
        }
    }
}

/// Moving average of width `size`, centered so that the window spans
/// `size / 2` samples before and `size - 1 - size / 2` after each sample.
pub fn uniform_filter1d(data: &[f64], size: usize, mode: BorderMode) -> Vec<f64> {
    let n = data.len();
    if n == 0 || size <= 1 {
        return data.to_vec();
    }
    let left = (size / 2) as isize;
    let right = (size - 1) as isize - left;

    (0..n as isize)
        .map(|i| {
            let sum: f64 = (i - left..=i + right)
                .map(|k| data[border_index(k, n, mode)])
                .sum();
            sum / size as f64
        })
        .collect()
}

pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Population standard deviation.
pub fn std_dev(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let m = mean(data);
    (data.iter().map(|v| (v - m).powi(2)).sum::<f64>() / data.len() as f64).sqrt()
}

/// Percentile `q` in `[0, 100]` with linear interpolation between ranks.
pub fn percentile(data: &[f64], q: f64) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// Index of the largest value; the earliest one on ties.
pub fn argmax(data: &[f64]) -> Option<usize> {
    data.iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// Constraints of [`find_peaks`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PeakConstraints {
    /// Minimum peak value
    pub height: Option<f64>,
    /// Minimum index separation between kept peaks
    pub distance: Option<usize>,
    /// Minimum prominence
    pub prominence: Option<f64>,
}

/// Strict local maxima. Plateaus report their middle sample; the first and
/// last samples are never peaks.
pub fn local_maxima(x: &[f64]) -> Vec<usize> {
    let n = x.len();
    let mut peaks = Vec::new();
    if n < 3 {
        return peaks;
    }

    let mut i = 1;
    while i < n - 1 {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < n - 1 && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
            }
            i = ahead;
        } else {
            i += 1;
        }
    }
    peaks
}

/// Height of each peak above the higher of its two surrounding bases.
pub fn peak_prominences(x: &[f64], peaks: &[usize]) -> Vec<f64> {
    peaks
        .iter()
        .map(|&p| {
            let height = x[p];

            let mut left_min = height;
            let mut i = p as isize;
            while i >= 0 && x[i as usize] <= height {
                left_min = left_min.min(x[i as usize]);
                i -= 1;
            }

            let mut right_min = height;
            let mut j = p;
            while j < x.len() && x[j] <= height {
                right_min = right_min.min(x[j]);
                j += 1;
            }

            height - left_min.max(right_min)
        })
        .collect()
}

/// Drop peaks closer than `distance` to a higher peak.
fn select_by_distance(x: &[f64], peaks: &[usize], distance: usize) -> Vec<usize> {
    let mut keep = vec![true; peaks.len()];
    let mut order: Vec<usize> = (0..peaks.len()).collect();
    order.sort_by(|&a, &b| x[peaks[a]].total_cmp(&x[peaks[b]]));

    for &j in order.iter().rev() {
        if !keep[j] {
            continue;
        }
        let mut k = j;
        while k > 0 && peaks[j] - peaks[k - 1] < distance {
            keep[k - 1] = false;
            k -= 1;
        }
        let mut k = j + 1;
        while k < peaks.len() && peaks[k] - peaks[j] < distance {
            keep[k] = false;
            k += 1;
        }
    }

    peaks
        .iter()
        .zip(keep)
        .filter(|(_, k)| *k)
        .map(|(&p, _)| p)
        .collect()
}

/// Peak search: local maxima filtered by height, then distance, then prominence.
pub fn find_peaks(x: &[f64], constraints: PeakConstraints) -> Vec<usize> {
    let mut peaks = local_maxima(x);

    if let Some(min_height) = constraints.height {
        peaks.retain(|&p| x[p] >= min_height);
    }

    if let Some(distance) = constraints.distance {
        if distance > 1 && peaks.len() > 1 {
            peaks = select_by_distance(x, &peaks, distance);
        }
    }

    if let Some(min_prominence) = constraints.prominence {
        let prominences = peak_prominences(x, &peaks);
        peaks = peaks
            .into_iter()
            .zip(prominences)
            .filter(|(_, prom)| *prom >= min_prominence)
            .map(|(p, _)| p)
            .collect();
    }

    peaks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_filter_reflect() {
        let data = [1.0, 2.0, 3.0, 4.0];
        // size 3: [1 1 2] [1 2 3] [2 3 4] [3 4 4]
        let out = uniform_filter1d(&data, 3, BorderMode::Reflect);
        let expected = [4.0 / 3.0, 2.0, 3.0, 11.0 / 3.0];
        for (a, b) in out.iter().zip(expected) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_uniform_filter_even_size_window() {
        let data = [0.0, 0.0, 4.0, 0.0, 0.0];
        // size 2 spans [i-1, i]
        let out = uniform_filter1d(&data, 2, BorderMode::Nearest);
        assert_eq!(out, vec![0.0, 0.0, 2.0, 2.0, 0.0]);
    }

    #[test]
    fn test_uniform_filter_nearest_edges() {
        let data = [5.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0];
        let out = uniform_filter1d(&data, 5, BorderMode::Nearest);
        // window at 0 = [5 5 5 0 0]
        assert!((out[0] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_percentile_interpolates() {
        let data = [4.0, 1.0, 3.0, 2.0];
        assert!((percentile(&data, 25.0) - 1.75).abs() < 1e-12);
        assert_eq!(percentile(&data, 100.0), 4.0);
        assert_eq!(percentile(&data, 0.0), 1.0);
    }

    #[test]
    fn test_argmax_prefers_first() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0]), Some(1));
        assert_eq!(argmax(&[]), None);
        assert_eq!(argmax(&[f64::NEG_INFINITY, 0.0]), Some(1));
    }

    #[test]
    fn test_local_maxima_with_plateau() {
        let x = [0.0, 1.0, 1.0, 1.0, 0.0, 2.0, 0.0, 3.0];
        // plateau 1..=3 reports 2; last sample is never a peak
        assert_eq!(local_maxima(&x), vec![2, 5]);
    }

    #[test]
    fn test_prominence() {
        let x = [0.0, 3.0, 1.0, 2.0, 0.5, 4.0, 0.0];
        let prom = peak_prominences(&x, &[1, 3, 5]);
        // the right base of the first peak stops at the higher peak at 5
        assert_eq!(prom, vec![2.5, 1.0, 4.0]);
    }

    #[test]
    fn test_find_peaks_distance_keeps_higher() {
        let mut x = vec![0.0; 30];
        x[10] = 0.8;
        x[15] = 0.9;
        x[25] = 0.5;
        let peaks = find_peaks(
            &x,
            PeakConstraints {
                distance: Some(12),
                ..Default::default()
            },
        );
        assert_eq!(peaks, vec![15]);
    }

    #[test]
    fn test_find_peaks_height_and_prominence() {
        let x = [0.0, 0.2, 0.1, 0.9, 0.0, 0.3, 0.25, 0.0];
        let peaks = find_peaks(
            &x,
            PeakConstraints {
                height: Some(0.15),
                prominence: Some(0.2),
                ..Default::default()
            },
        );
        assert_eq!(peaks, vec![3, 5]);
    }
}
