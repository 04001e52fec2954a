//! Euclidean projections onto the probability simplex and the L1 ball.
//!
//! Both follow Duchi et al., "Efficient projections onto the l1-ball for
//! learning in high dimensions" (ICML 2008): sort, cumulative sum, find the
//! last index that stays positive after thresholding.

use ndarray::Array1;

use crate::error::{Result, SpikeError};

fn check_radius(s: f64) -> Result<()> {
    if !(s > 0.0) || !s.is_finite() {
        return Err(SpikeError::invalid(format!(
            "radius must be strictly positive and finite, got {s}"
        )));
    }
    Ok(())
}

/// Project `v` onto `{ w : sum(w) = s, w >= 0 }`.
///
/// Solves `min_w 0.5 * ||w - v||^2` under the simplex constraint.
pub fn project_simplex(v: &Array1<f64>, s: f64) -> Result<Array1<f64>> {
    check_radius(s)?;
    if v.is_empty() {
        return Err(SpikeError::shape("cannot project an empty vector"));
    }
    if v.sum() == s && v.iter().all(|&x| x >= 0.0) {
        return Ok(v.clone());
    }

    let mut u = v.to_vec();
    u.sort_by(|a, b| b.partial_cmp(a).unwrap_or(core::cmp::Ordering::Equal));

    // rho: last index where u[i] * (i + 1) > cumsum[i] - s. Index 0 always qualifies.
    let mut cumsum = 0.0;
    let mut theta = u[0] - s;
    for (i, &ui) in u.iter().enumerate() {
        cumsum += ui;
        let k = (i + 1) as f64;
        if ui * k > cumsum - s {
            theta = (cumsum - s) / k;
        }
    }

    Ok(v.mapv(|x| (x - theta).max(0.0)))
}

/// Project `v` onto `{ w : ||w||_1 <= s }`.
///
/// Inside the ball `v` is returned unchanged. Otherwise `|v|` is projected onto
/// the simplex of radius `s` and the original signs are put back.
pub fn project_l1ball(v: &Array1<f64>, s: f64) -> Result<Array1<f64>> {
    check_radius(s)?;
    if v.is_empty() {
        return Err(SpikeError::shape("cannot project an empty vector"));
    }
    let u = v.mapv(f64::abs);
    if u.sum() <= s {
        return Ok(v.clone());
    }
    let w = project_simplex(&u, s)?;
    Ok(w * &v.mapv(f64::signum))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prng::Prng;
    use ndarray::array;

    fn random_vec(rng: &mut Prng, n: usize, scale: f64) -> Array1<f64> {
        Array1::from_iter((0..n).map(|_| scale * rng.next_gaussian()))
    }

    #[test]
    fn simplex_output_is_feasible() {
        let mut rng = Prng::new(17);
        for trial in 0..200 {
            let n = 1 + trial % 23;
            let v = random_vec(&mut rng, n, 3.0);
            let s = 0.1 + rng.next_f64_01() * 5.0;
            let w = project_simplex(&v, s).unwrap();
            assert!(w.iter().all(|&x| x >= 0.0));
            assert!((w.sum() - s).abs() < 1e-9, "sum={} s={}", w.sum(), s);
        }
    }

    #[test]
    fn simplex_known_answer() {
        let v = array![0.5, 0.2, -0.3];
        let w = project_simplex(&v, 1.0).unwrap();
        // theta = (0.5 + 0.2 - 1) / 2 = -0.15
        assert!((w[0] - 0.65).abs() < 1e-12);
        assert!((w[1] - 0.35).abs() < 1e-12);
        assert_eq!(w[2], 0.0);
    }

    #[test]
    fn simplex_identity_on_feasible_point() {
        let v = array![0.25, 0.25, 0.5];
        assert_eq!(project_simplex(&v, 1.0).unwrap(), v);
    }

    #[test]
    fn simplex_rejects_bad_radius() {
        let v = array![1.0, 2.0];
        assert!(project_simplex(&v, 0.0).is_err());
        assert!(project_simplex(&v, -1.0).is_err());
        assert!(project_l1ball(&v, 0.0).is_err());
    }

    #[test]
    fn l1ball_interior_is_untouched() {
        let v = array![0.1, -0.2, 0.3];
        assert_eq!(project_l1ball(&v, 1.0).unwrap(), v);
    }

    #[test]
    fn l1ball_active_constraint_hits_radius_and_keeps_signs() {
        let mut rng = Prng::new(29);
        for _ in 0..200 {
            let v = random_vec(&mut rng, 40, 2.0);
            let s = 1.0;
            let w = project_l1ball(&v, s).unwrap();
            let l1: f64 = w.iter().map(|x| x.abs()).sum();
            assert!((l1 - s).abs() < 1e-9, "l1={l1}");
            for (wi, vi) in w.iter().zip(v.iter()) {
                if *wi != 0.0 {
                    assert_eq!(wi.signum(), vi.signum());
                }
            }
        }
    }
}
