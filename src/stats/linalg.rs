//! Dense least squares via Householder QR. Matrices are column-major: `columns[j][i]`
//! is row `i` of column `j`.

const RANK_TOLERANCE: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq)]
pub struct LeastSquares {
    pub beta: Vec<f64>,
    /// (X'X)^-1, computed as R^-1 R^-T.
    pub xtx_inv: Vec<Vec<f64>>,
    pub fitted: Vec<f64>,
    pub residuals: Vec<f64>,
    pub rss: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankDeficient {
    pub column: usize,
}

pub fn least_squares(
    columns: &[Vec<f64>],
    y: &[f64],
) -> std::result::Result<LeastSquares, RankDeficient> {
    let n = y.len();
    let p = columns.len();
    let mut a: Vec<Vec<f64>> = columns.to_vec();
    let mut b: Vec<f64> = y.to_vec();
    let column_norms: Vec<f64> = columns.iter().map(|c| norm(c)).collect();

    for k in 0..p {
        let tail_norm = norm(&a[k][k..]);
        if column_norms[k] == 0.0 || tail_norm <= RANK_TOLERANCE * column_norms[k] {
            return Err(RankDeficient { column: k });
        }

        let alpha = if a[k][k] > 0.0 { -tail_norm } else { tail_norm };
        let mut v: Vec<f64> = a[k][k..].to_vec();
        v[0] -= alpha;
        let v_norm2: f64 = v.iter().map(|x| x * x).sum();

        if v_norm2 > 0.0 {
            for column in a.iter_mut().skip(k) {
                reflect(&v, v_norm2, &mut column[k..]);
            }
            reflect(&v, v_norm2, &mut b[k..]);
        }
        a[k][k] = alpha;
        for value in a[k].iter_mut().skip(k + 1) {
            *value = 0.0;
        }
    }

    // R[i][j] = a[j][i] for i <= j
    let mut beta = vec![0.0; p];
    for i in (0..p).rev() {
        let mut acc = b[i];
        for j in (i + 1)..p {
            acc -= a[j][i] * beta[j];
        }
        beta[i] = acc / a[i][i];
    }

    let r_inv = upper_inverse(&a, p);
    let mut xtx_inv = vec![vec![0.0; p]; p];
    for i in 0..p {
        for j in 0..p {
            let start = i.max(j);
            xtx_inv[i][j] = (start..p).map(|k| r_inv[i][k] * r_inv[j][k]).sum();
        }
    }

    let fitted: Vec<f64> = (0..n)
        .map(|i| (0..p).map(|j| columns[j][i] * beta[j]).sum())
        .collect();
    let residuals: Vec<f64> = y.iter().zip(&fitted).map(|(y, f)| y - f).collect();
    let rss = residuals.iter().map(|r| r * r).sum();

    Ok(LeastSquares {
        beta,
        xtx_inv,
        fitted,
        residuals,
        rss,
    })
}

fn reflect(v: &[f64], v_norm2: f64, target: &mut [f64]) {
    let dot: f64 = v.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
    let scale = 2.0 * dot / v_norm2;
    for (t, vi) in target.iter_mut().zip(v) {
        *t -= scale * vi;
    }
}

/// Row-major inverse of the upper-triangular R stored column-major in `a`.
fn upper_inverse(a: &[Vec<f64>], p: usize) -> Vec<Vec<f64>> {
    let mut inv = vec![vec![0.0; p]; p];
    for i in (0..p).rev() {
        inv[i][i] = 1.0 / a[i][i];
        for j in (i + 1)..p {
            let acc: f64 = ((i + 1)..=j).map(|k| a[k][i] * inv[k][j]).sum();
            inv[i][j] = -acc / a[i][i];
        }
    }
    inv
}

fn norm(values: &[f64]) -> f64 {
    values.iter().map(|x| x * x).sum::<f64>().sqrt()
}
