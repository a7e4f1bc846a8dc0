use serde::Serialize;

pub const DEFAULT_FRAC: f64 = 2.0 / 3.0;
pub const DEFAULT_ITERATIONS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CurvePoint {
    pub x: f64,
    pub y: f64,
}

/// Locally weighted linear smoothing (tricube neighbourhood weights, bisquare
/// robustness weights). Returns one point per input observation, sorted by x.
pub fn lowess(x: &[f64], y: &[f64], frac: f64, iterations: usize) -> Vec<CurvePoint> {
    let n = x.len().min(y.len());
    if n == 0 {
        return Vec::new();
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|a, b| x[*a].total_cmp(&x[*b]));
    let xs: Vec<f64> = order.iter().map(|i| x[*i]).collect();
    let ys: Vec<f64> = order.iter().map(|i| y[*i]).collect();

    let k = ((frac * n as f64).ceil() as usize).clamp(2.min(n), n);
    let mut robustness = vec![1.0; n];
    let mut fitted = vec![0.0; n];

    for iteration in 0..=iterations {
        for i in 0..n {
            fitted[i] = local_fit(&xs, &ys, &robustness, i, k);
        }
        if iteration == iterations {
            break;
        }

        let residuals: Vec<f64> = ys.iter().zip(&fitted).map(|(y, f)| y - f).collect();
        let mut abs: Vec<f64> = residuals.iter().map(|r| r.abs()).collect();
        abs.sort_by(f64::total_cmp);
        let scale = 6.0 * super::quantile_sorted(&abs, 0.5);
        if scale <= f64::EPSILON {
            break;
        }
        for (w, r) in robustness.iter_mut().zip(&residuals) {
            let u = r / scale;
            *w = if u.abs() < 1.0 { (1.0 - u * u).powi(2) } else { 0.0 };
        }
    }

    xs.into_iter()
        .zip(fitted)
        .map(|(x, y)| CurvePoint { x, y })
        .collect()
}

fn local_fit(xs: &[f64], ys: &[f64], robustness: &[f64], i: usize, k: usize) -> f64 {
    let n = xs.len();
    let x0 = xs[i];

    // k nearest neighbours form a contiguous window in sorted order
    let (mut lo, mut hi) = (i, i);
    while hi - lo + 1 < k {
        if lo == 0 {
            hi += 1;
        } else if hi == n - 1 {
            lo -= 1;
        } else if x0 - xs[lo - 1] <= xs[hi + 1] - x0 {
            lo -= 1;
        } else {
            hi += 1;
        }
    }
    let radius = (x0 - xs[lo]).max(xs[hi] - x0);

    let mut sw = 0.0;
    let mut swx = 0.0;
    let mut swy = 0.0;
    let mut swxx = 0.0;
    let mut swxy = 0.0;
    for j in lo..=hi {
        let d = if radius > 0.0 {
            (xs[j] - x0).abs() / radius
        } else {
            0.0
        };
        let tricube = if d < 1.0 { (1.0 - d.powi(3)).powi(3) } else { 0.0 };
        let w = tricube * robustness[j];
        sw += w;
        swx += w * xs[j];
        swy += w * ys[j];
        swxx += w * xs[j] * xs[j];
        swxy += w * xs[j] * ys[j];
    }

    if sw <= 0.0 {
        return ys[i];
    }
    let x_bar = swx / sw;
    let y_bar = swy / sw;
    let sxx = swxx - sw * x_bar * x_bar;
    if sxx.abs() <= 1e-12 * sw.max(1.0) {
        return y_bar;
    }
    let slope = (swxy - sw * x_bar * y_bar) / sxx;
    y_bar + slope * (x0 - x_bar)
}
