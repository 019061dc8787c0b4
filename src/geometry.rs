//! Tangent planes to the power-mean surface `z = x^a * y^(1-a)`, `a = 1/p`.
//!
//! Throughout, `x` is a source's auxiliary variable `k[i]`, `y` the fairness
//! factor `l_eps` and `z` the source cost `l[i]`. The surface is a weighted
//! geometric mean, hence concave, so every tangent plane lies on or above it
//! and the half-space `tangent >= z` never cuts off a point with
//! `z <= x^a * y^(1-a)`.

/// A candidate is treated as feasible when `z` exceeds the surface by at most this.
pub const VIOLATION_TOLERANCE: f64 = 1e-4;

/// Axis projections dividing by `x` or `y` are skipped below this value.
pub const PROJECTION_GUARD: f64 = 1e-5;

/// Coefficients below this magnitude count as zero when testing for the trivial plane.
const DEGENERATE_COEFFICIENT: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfacePoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl SurfacePoint {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// The half-space `aux * x + fairness * y + cost * z >= 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hyperplane {
    pub aux: f64,
    pub fairness: f64,
    pub cost: f64,
}

impl Hyperplane {
    pub fn evaluate(&self, point: SurfacePoint) -> f64 {
        self.aux * point.x + self.fairness * point.y + self.cost * point.z
    }

    pub fn is_satisfied(&self, point: SurfacePoint, tolerance: f64) -> bool {
        self.evaluate(point) >= -tolerance
    }

    /// True for the all-zero plane, i.e. the inequality `0 >= 0`.
    pub fn is_degenerate(&self) -> bool {
        [self.aux, self.fairness, self.cost]
            .iter()
            .all(|c| c.abs() <= DEGENERATE_COEFFICIENT)
    }
}

/// `x^a * y^(1-a)` for `a = 1/p`.
pub fn power_mean(x: f64, y: f64, p: u32) -> f64 {
    let alpha = 1.0 / p as f64;
    x.powf(alpha) * y.powf(1.0 - alpha)
}

/// How far `z` lies above the surface; positive means violated.
pub fn violation(point: SurfacePoint, p: u32) -> f64 {
    point.z - power_mean(point.x, point.y, p)
}

/// Projects `point` onto the surface along the `z`, `x` and `y` axes.
///
/// The `z` projection is always returned. Projecting along `x` divides by
/// `y^(p-1)` and along `y` divides by `x^(1/(p-1))`, so each is omitted when
/// the divisor's base is at or below [`PROJECTION_GUARD`].
pub fn projection_points(point: SurfacePoint, p: u32) -> Vec<SurfacePoint> {
    let SurfacePoint { x, y, z } = point;
    let pf = p as f64;
    let mut points = Vec::with_capacity(3);

    points.push(SurfacePoint::new(x, y, power_mean(x, y, p)));
    if y > PROJECTION_GUARD {
        points.push(SurfacePoint::new(z.powf(pf) / y.powf(pf - 1.0), y, z));
    }
    if x > PROJECTION_GUARD {
        points.push(SurfacePoint::new(
            x,
            z.powf(pf / (pf - 1.0)) / x.powf(1.0 / (pf - 1.0)),
            z,
        ));
    }
    points
}

/// Tangent plane to the surface at `at`, scaled by `x*y` to stay finite at the axes:
/// `a*y*z * x + (1-a)*z*x * y - x*y * z >= 0`.
pub fn tangent_hyperplane(at: SurfacePoint, p: u32) -> Hyperplane {
    let alpha = 1.0 / p as f64;
    Hyperplane {
        aux: alpha * at.y * at.z,
        fairness: (1.0 - alpha) * at.z * at.x,
        cost: -at.x * at.y,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * (1.0 + a.abs().max(b.abs()))
    }

    #[test]
    fn projections_land_on_surface() {
        for p in [2, 3, 5] {
            let candidate = SurfacePoint::new(1.5, 4.0, 3.5);
            let points = projection_points(candidate, p);
            assert_eq!(points.len(), 3);
            for q in &points {
                assert!(close(q.z, power_mean(q.x, q.y, p)), "{q:?} off surface for p={p}");
            }
            // each projection keeps two of the candidate's coordinates
            assert_eq!((points[0].x, points[0].y), (candidate.x, candidate.y));
            assert_eq!((points[1].y, points[1].z), (candidate.y, candidate.z));
            assert_eq!((points[2].x, points[2].z), (candidate.x, candidate.z));
        }
    }

    #[test]
    fn guards_skip_axis_projections_near_zero() {
        let zero_aux = projection_points(SurfacePoint::new(0.0, 2.0, 1.0), 2);
        assert_eq!(zero_aux.len(), 2);
        assert_eq!(zero_aux[0].z, 0.0);

        let zero_fairness = projection_points(SurfacePoint::new(2.0, 0.0, 1.0), 2);
        assert_eq!(zero_fairness.len(), 2);
        assert!(zero_fairness.iter().all(|q| q.z.is_finite() && q.y.is_finite()));

        let origin = projection_points(SurfacePoint::new(0.0, 0.0, 1.0), 4);
        assert_eq!(origin, vec![SurfacePoint::new(0.0, 0.0, 0.0)]);
    }

    #[test]
    fn initial_tangent_matches_unit_anchor() {
        let plane = tangent_hyperplane(SurfacePoint::new(1.0, 1.0, 1.0), 4);
        assert_eq!(plane, Hyperplane { aux: 0.25, fairness: 0.75, cost: -1.0 });
    }

    #[test]
    fn tangent_at_the_axis_is_degenerate() {
        let plane = tangent_hyperplane(SurfacePoint::new(0.0, 3.0, 0.0), 2);
        assert!(plane.is_degenerate());
        assert!(!tangent_hyperplane(SurfacePoint::new(1.0, 3.0, 3f64.sqrt()), 2).is_degenerate());
    }

    #[test]
    fn violation_sign() {
        assert!(violation(SurfacePoint::new(4.0, 1.0, 3.0), 2) > 0.0);
        assert!(violation(SurfacePoint::new(4.0, 1.0, 1.0), 2) < 0.0);
        assert!(violation(SurfacePoint::new(4.0, 1.0, 2.0), 2).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn tangent_supports_the_surface(
            p in 2u32..8,
            ax in 0.01f64..50.0,
            ay in 0.01f64..50.0,
            x in 0.0f64..50.0,
            y in 0.0f64..50.0,
            shrink in 0.0f64..1.0,
        ) {
            let anchor = SurfacePoint::new(ax, ay, power_mean(ax, ay, p));
            let plane = tangent_hyperplane(anchor, p);
            let scale = 1.0 + anchor.x * anchor.y * anchor.z;

            prop_assert!(plane.evaluate(anchor).abs() <= 1e-9 * scale);

            let below = SurfacePoint::new(x, y, shrink * power_mean(x, y, p));
            prop_assert!(plane.is_satisfied(below, 1e-9 * scale * (1.0 + x + y)));
        }

        #[test]
        fn projection_cuts_off_the_violating_candidate(
            p in 2u32..6,
            x in 0.1f64..20.0,
            y in 0.1f64..20.0,
            excess in 0.01f64..10.0,
        ) {
            let z = power_mean(x, y, p) + excess;
            let candidate = SurfacePoint::new(x, y, z);
            let cuts: Vec<_> = projection_points(candidate, p)
                .into_iter()
                .map(|q| tangent_hyperplane(q, p))
                .collect();
            prop_assert!(cuts.iter().any(|h| h.evaluate(candidate) < 0.0));
        }
    }
}
