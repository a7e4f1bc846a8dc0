//! Tukey's honestly significant difference test and the studentized range
//! distribution it relies on.

use log::warn;
use serde::Serialize;
use statrs::function::erf::erfc;
use statrs::function::gamma::ln_gamma;

use super::mean;
use crate::error::{DashboardError, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TukeyRow {
    pub group1: String,
    pub group2: String,
    /// mean(group2) - mean(group1)
    pub meandiff: f64,
    pub p_adj: f64,
    pub lower: f64,
    pub upper: f64,
    pub reject: bool,
}

/// All pairwise comparisons of `groups`, which must be in label order.
pub fn pairwise_tukey_hsd(groups: &[(String, Vec<f64>)], alpha: f64) -> Result<Vec<TukeyRow>> {
    let k = groups.len();
    if k < 2 {
        return Err(DashboardError::InsufficientData(format!(
            "Tukey HSD needs at least two groups, found {k}"
        )));
    }
    if let Some((label, values)) = groups.iter().find(|(_, v)| v.len() < 2) {
        return Err(DashboardError::InsufficientData(format!(
            "group `{label}` has {} observation(s), at least two are required",
            values.len()
        )));
    }

    let total: usize = groups.iter().map(|(_, v)| v.len()).sum();
    let df = (total - k) as f64;
    let means: Vec<f64> = groups.iter().map(|(_, v)| mean(v)).collect();
    let within: f64 = groups
        .iter()
        .zip(&means)
        .map(|((_, v), m)| v.iter().map(|x| (x - m).powi(2)).sum::<f64>())
        .sum();
    let mse = within / df;
    let q_crit = qtukey(1.0 - alpha, k as f64, df);

    let mut rows = Vec::with_capacity(k * (k - 1) / 2);
    for i in 0..k {
        for j in (i + 1)..k {
            let (n_i, n_j) = (groups[i].1.len() as f64, groups[j].1.len() as f64);
            let meandiff = means[j] - means[i];
            let se = (mse / 2.0 * (1.0 / n_i + 1.0 / n_j)).sqrt();
            let q = if meandiff == 0.0 {
                0.0
            } else if se > 0.0 {
                meandiff.abs() / se
            } else {
                f64::INFINITY
            };
            let p_adj = (1.0 - ptukey(q, k as f64, df)).clamp(0.0, 1.0);

            rows.push(TukeyRow {
                group1: groups[i].0.clone(),
                group2: groups[j].0.clone(),
                meandiff,
                p_adj,
                lower: meandiff - q_crit * se,
                upper: meandiff + q_crit * se,
                reject: q > q_crit,
            });
        }
    }
    Ok(rows)
}

fn pnorm(x: f64) -> f64 {
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}

const XLEG: [f64; 6] = [
    0.981_560_634_246_719_3,
    0.904_117_256_370_474_9,
    0.769_902_674_194_304_7,
    0.587_317_954_286_617_4,
    0.367_831_498_998_180_2,
    0.125_233_408_511_468_9,
];

const ALEG: [f64; 6] = [
    0.047_175_336_386_511_83,
    0.106_939_325_995_318_4,
    0.160_078_328_543_346_2,
    0.203_167_426_723_065_9,
    0.233_492_536_538_354_8,
    0.249_147_045_813_402_8,
];

/// Probability that the range of `cc` standard normals is below `w`.
fn wprob(w: f64, cc: f64) -> f64 {
    const NLEG: usize = 12;
    const IHALF: usize = 6;
    const C1: f64 = -30.0;
    const C3: f64 = 60.0;
    const BB: f64 = 8.0;
    const WLAR: f64 = 3.0;

    let qsqz = w * 0.5;
    if qsqz >= BB {
        return 1.0;
    }

    let mut pr_w = 2.0 * pnorm(qsqz) - 1.0;
    pr_w = if pr_w >= 1.0 { 1.0 } else { pr_w.powf(cc) };

    let wincr = if w > WLAR { 2 } else { 3 };
    let mut blb = qsqz;
    let binc = (BB - qsqz) / wincr as f64;
    let mut bub = blb + binc;
    let mut einsum = 0.0;
    let cc1 = cc - 1.0;

    for _ in 0..wincr {
        let mut elsum = 0.0;
        let a = 0.5 * (bub + blb);
        let b = 0.5 * (bub - blb);

        for jj in 1..=NLEG {
            let (j, xx) = if IHALF < jj {
                let j = NLEG - jj + 1;
                (j, XLEG[j - 1])
            } else {
                (jj, -XLEG[jj - 1])
            };
            let ac = a + b * xx;
            let qexpo = ac * ac;
            if qexpo > C3 {
                break;
            }
            let pplus = 2.0 * pnorm(ac);
            let pminus = 2.0 * pnorm(ac - w);
            let rinsum = pplus * 0.5 - pminus * 0.5;
            if rinsum >= (C1 / cc1).exp() {
                elsum += ALEG[j - 1] * (-(0.5 * qexpo)).exp() * rinsum.powf(cc1);
            }
        }
        elsum *= (2.0 * b) * cc / (2.0 * std::f64::consts::PI).sqrt();
        einsum += elsum;
        blb = bub;
        bub += binc;
    }

    pr_w += einsum;
    if pr_w <= C1.exp() {
        return 0.0;
    }
    pr_w.min(1.0)
}

const XLEGQ: [f64; 8] = [
    0.989_400_934_991_649_9,
    0.944_575_023_073_232_6,
    0.865_631_202_387_831_7,
    0.755_404_408_355_003,
    0.617_876_244_402_643_7,
    0.458_016_777_657_227_4,
    0.281_603_550_779_258_9,
    0.095_012_509_837_637_44,
];

const ALEGQ: [f64; 8] = [
    0.027_152_459_411_754_095,
    0.062_253_523_938_647_89,
    0.095_158_511_682_492_78,
    0.124_628_971_255_533_87,
    0.149_595_988_816_576_73,
    0.169_156_519_395_002_54,
    0.182_603_415_044_923_59,
    0.189_450_610_455_068_5,
];

/// CDF of the studentized range for `nmeans` groups and `df` error degrees of freedom.
pub fn ptukey(q: f64, nmeans: f64, df: f64) -> f64 {
    const NLEGQ: usize = 16;
    const IHALFQ: usize = 8;
    const EPS1: f64 = -30.0;
    const EPS2: f64 = 1.0e-14;
    const DLARG: f64 = 25000.0;

    if q.is_nan() || nmeans < 2.0 || df < 2.0 {
        return f64::NAN;
    }
    if q <= 0.0 {
        return 0.0;
    }
    if q.is_infinite() {
        return 1.0;
    }
    if df > DLARG {
        return wprob(q, nmeans);
    }

    let f2 = df * 0.5;
    let mut f2lf = (f2 * df.ln()) - (df * std::f64::consts::LN_2) - ln_gamma(f2);
    let f21 = f2 - 1.0;
    let ff4 = df * 0.25;
    let ulen: f64 = if df <= 100.0 {
        1.0
    } else if df <= 800.0 {
        0.5
    } else if df <= 5000.0 {
        0.25
    } else {
        0.125
    };
    f2lf += ulen.ln();

    let mut ans = 0.0;
    let mut otsum = 0.0;
    for i in 1..=50 {
        otsum = 0.0;
        let twa1 = (2 * i - 1) as f64 * ulen;

        for jj in 1..=NLEGQ {
            let (node, t1) = if IHALFQ < jj {
                let x = XLEGQ[jj - IHALFQ - 1];
                let t1 = f2lf + f21 * (twa1 + x * ulen).ln() - (x * ulen + twa1) * ff4;
                (jj - IHALFQ - 1, t1)
            } else {
                let x = XLEGQ[jj - 1];
                let t1 = f2lf + f21 * (twa1 - x * ulen).ln() + (x * ulen - twa1) * ff4;
                (jj - 1, t1)
            };

            if t1 >= EPS1 {
                let x = XLEGQ[node] * ulen;
                let qsqz = if IHALFQ < jj {
                    q * ((x + twa1) * 0.5).sqrt()
                } else {
                    q * ((-x + twa1) * 0.5).sqrt()
                };
                otsum += wprob(qsqz, nmeans) * ALEGQ[node] * t1.exp();
            }
        }

        if i as f64 * ulen >= 1.0 && otsum <= EPS2 {
            break;
        }
        ans += otsum;
    }

    if otsum > EPS2 {
        warn!("studentized range integral did not converge (q={q}, k={nmeans}, df={df})");
    }
    ans.min(1.0)
}

fn qtukey_initial(p: f64, c: f64, v: f64) -> f64 {
    const P: [f64; 5] = [
        0.322_232_421_088,
        -1.0,
        -0.342_242_088_547,
        -0.204_231_210_125,
        -0.453_642_210_148e-04,
    ];
    const Q: [f64; 5] = [
        0.993_484_626_060e-01,
        0.588_581_570_495,
        0.531_103_462_366,
        0.103_537_752_850,
        0.385_607_006_340e-02,
    ];
    const VMAX: f64 = 120.0;

    let ps = 0.5 - 0.5 * p;
    let yi = (1.0 / (ps * ps)).ln().sqrt();
    let mut t = yi
        + ((((yi * P[4] + P[3]) * yi + P[2]) * yi + P[1]) * yi + P[0])
            / ((((yi * Q[4] + Q[3]) * yi + Q[2]) * yi + Q[1]) * yi + Q[0]);
    if v < VMAX {
        t += (t * t * t + t) / v / 4.0;
    }
    let mut q = 0.8832 - 0.2368 * t;
    if v < VMAX {
        q += -1.214 / v + 1.208 * t / v;
    }
    t * (q * (c - 1.0).ln() + 1.4142)
}

/// Quantile of the studentized range, found by secant iteration on [`ptukey`].
pub fn qtukey(p: f64, nmeans: f64, df: f64) -> f64 {
    const EPS: f64 = 0.0001;
    const MAXITER: usize = 50;

    if !(0.0..1.0).contains(&p) || nmeans < 2.0 || df < 2.0 {
        return f64::NAN;
    }
    if p == 0.0 {
        return 0.0;
    }

    let mut x0 = qtukey_initial(p, nmeans, df);
    let mut valx0 = ptukey(x0, nmeans, df) - p;
    let mut x1 = if valx0 > 0.0 { (x0 - 1.0).max(0.0) } else { x0 + 1.0 };
    let mut valx1 = ptukey(x1, nmeans, df) - p;

    for _ in 0..MAXITER {
        let mut ans = x1 - (valx1 * (x1 - x0)) / (valx1 - valx0);
        valx0 = valx1;
        x0 = x1;
        if ans < 0.0 {
            ans = 0.0;
        }
        valx1 = ptukey(ans, nmeans, df) - p;
        x1 = ans;
        if (x1 - x0).abs() < EPS {
            return ans;
        }
    }

    warn!("studentized range quantile did not converge (p={p}, k={nmeans}, df={df})");
    x1
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn quantiles_match_published_tables() {
        assert_relative_eq!(qtukey(0.95, 3.0, 10.0), 3.877, epsilon = 5e-3);
        assert_relative_eq!(qtukey(0.95, 4.0, 20.0), 3.958, epsilon = 5e-3);
        assert_relative_eq!(qtukey(0.95, 2.0, 60.0), 2.829, epsilon = 5e-3);
    }

    #[test]
    fn cdf_is_inverse_of_quantile() {
        let q = qtukey(0.95, 4.0, 200.0);
        assert_relative_eq!(ptukey(q, 4.0, 200.0), 0.95, epsilon = 1e-4);
        assert_eq!(ptukey(0.0, 4.0, 200.0), 0.0);
        assert!(ptukey(50.0, 4.0, 200.0) > 0.999_999);
    }

    #[test]
    fn large_df_approaches_normal_range() {
        // q(0.95; 3, inf) = 3.314
        for df in [500.0, 2000.0, 10_000.0] {
            assert_relative_eq!(ptukey(3.314, 3.0, df), 0.95, epsilon = 3e-3);
        }
    }

    fn groups() -> Vec<(String, Vec<f64>)> {
        vec![
            ("a".to_string(), vec![4.0, 5.0, 6.0, 5.0]),
            ("b".to_string(), vec![5.0, 6.0, 4.0, 5.0]),
            ("c".to_string(), vec![12.0, 13.0, 11.0, 12.0]),
        ]
    }

    #[test]
    fn produces_one_row_per_pair() {
        let rows = pairwise_tukey_hsd(&groups(), 0.05).unwrap();
        let pairs: Vec<(&str, &str)> = rows
            .iter()
            .map(|r| (r.group1.as_str(), r.group2.as_str()))
            .collect();
        assert_eq!(pairs, vec![("a", "b"), ("a", "c"), ("b", "c")]);
    }

    #[test]
    fn flags_only_the_shifted_group() {
        let rows = pairwise_tukey_hsd(&groups(), 0.05).unwrap();
        assert!(!rows[0].reject);
        assert!(rows[1].reject && rows[2].reject);
        assert_relative_eq!(rows[1].meandiff, 7.0, epsilon = 1e-12);
        assert!(rows[1].lower > 0.0);
        assert!(rows[0].lower < 0.0 && rows[0].upper > 0.0);
        assert!(rows[0].p_adj > 0.9);
        assert!(rows[1].p_adj < 0.001);
    }

    #[test]
    fn rejects_singleton_groups() {
        let groups = vec![
            ("a".to_string(), vec![1.0, 2.0]),
            ("b".to_string(), vec![3.0]),
        ];
        assert!(matches!(
            pairwise_tukey_hsd(&groups, 0.05),
            Err(DashboardError::InsufficientData(_))
        ));
    }
}
