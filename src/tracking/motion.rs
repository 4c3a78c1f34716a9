// src/tracking/motion.rs
//
// Constant-velocity motion estimate for a track. Four independent
// position/velocity Kalman filters over box center and size, stepped in
// frame units so prediction is identical on every replay.

use crate::geometry::BBox;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Process noise variance (px/frame^2)^2
    pub process_noise: f32,
    /// Measurement noise variance px^2
    pub measurement_noise: f32,
    /// Variance of the initial velocity guess
    pub initial_velocity_var: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            process_noise: 1.0,
            measurement_noise: 4.0,
            initial_velocity_var: 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Axis {
    pos: f32,
    vel: f32,
    /// Covariance [[pp, pv], [vp, vv]]
    p: [[f32; 2]; 2],
}

impl Axis {
    fn new(pos: f32, cfg: &MotionConfig) -> Self {
        Self {
            pos,
            vel: 0.0,
            p: [[cfg.measurement_noise, 0.0], [0.0, cfg.initial_velocity_var]],
        }
    }

    fn predict(&mut self, q: f32) {
        self.pos += self.vel;
        // F = [[1, 1], [0, 1]], Q = q * [[1/4, 1/2], [1/2, 1]]
        let [[a, b], [c, d]] = self.p;
        self.p = [
            [a + b + c + d + 0.25 * q, b + d + 0.5 * q],
            [c + d + 0.5 * q, d + q],
        ];
    }

    fn update(&mut self, z: f32, r: f32) {
        let s = self.p[0][0] + r;
        if s <= f32::EPSILON {
            return;
        }
        let k0 = self.p[0][0] / s;
        let k1 = self.p[1][0] / s;
        let y = z - self.pos;
        self.pos += k0 * y;
        self.vel += k1 * y;
        let [[a, b], [c, d]] = self.p;
        self.p = [[(1.0 - k0) * a, (1.0 - k0) * b], [c - k1 * a, d - k1 * b]];
    }
}

#[derive(Debug, Clone)]
pub struct MotionModel {
    /// cx, cy, w, h
    axes: [Axis; 4],
    process_noise: f32,
    measurement_noise: f32,
}

impl MotionModel {
    pub fn new(bbox: &BBox, cfg: &MotionConfig) -> Self {
        let c = bbox.center();
        Self {
            axes: [
                Axis::new(c.x, cfg),
                Axis::new(c.y, cfg),
                Axis::new(bbox.width(), cfg),
                Axis::new(bbox.height(), cfg),
            ],
            process_noise: cfg.process_noise,
            measurement_noise: cfg.measurement_noise,
        }
    }

    /// Advance one frame.
    pub fn predict(&mut self) -> BBox {
        for axis in &mut self.axes {
            axis.predict(self.process_noise);
        }
        // A shrinking box must not collapse.
        for axis in &mut self.axes[2..] {
            if axis.pos < 1.0 {
                axis.pos = 1.0;
                axis.vel = 0.0;
            }
        }
        self.bbox()
    }

    pub fn correct(&mut self, observed: &BBox) {
        let c = observed.center();
        let z = [c.x, c.y, observed.width(), observed.height()];
        for (axis, value) in self.axes.iter_mut().zip(z) {
            axis.update(value, self.measurement_noise);
        }
    }

    pub fn bbox(&self) -> BBox {
        BBox::from_center(
            self.axes[0].pos,
            self.axes[1].pos,
            self.axes[2].pos,
            self.axes[3].pos,
        )
    }

    /// Center velocity in px/frame.
    pub fn velocity(&self) -> (f32, f32) {
        (self.axes[0].vel, self.axes[1].vel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stationary_object_stays_put() {
        let b = BBox::new(100.0, 100.0, 140.0, 200.0);
        let mut m = MotionModel::new(&b, &MotionConfig::default());
        for _ in 0..10 {
            m.predict();
            m.correct(&b);
        }
        let p = m.predict();
        assert!((p.center().x - 120.0).abs() < 0.5);
        assert!((p.width() - 40.0).abs() < 0.5);
    }

    #[test]
    fn test_learns_constant_velocity() {
        let cfg = MotionConfig::default();
        let mut m = MotionModel::new(&BBox::new(0.0, 0.0, 20.0, 20.0), &cfg);
        for i in 1..=30 {
            m.predict();
            let x = i as f32 * 5.0;
            m.correct(&BBox::new(x, 0.0, x + 20.0, 20.0));
        }
        let (vx, vy) = m.velocity();
        assert!((vx - 5.0).abs() < 0.3, "vx={}", vx);
        assert!(vy.abs() < 0.3);

        // Coast three frames without measurements
        let mut last = m.bbox();
        for _ in 0..3 {
            last = m.predict();
        }
        assert!((last.x1 - 165.0).abs() < 2.0, "x1={}", last.x1);
    }

    #[test]
    fn test_size_never_collapses() {
        let cfg = MotionConfig::default();
        let mut m = MotionModel::new(&BBox::new(0.0, 0.0, 40.0, 40.0), &cfg);
        for i in 1..=5 {
            m.predict();
            let s = 40.0 - i as f32 * 7.0;
            m.correct(&BBox::new(0.0, 0.0, s, s));
        }
        for _ in 0..50 {
            let b = m.predict();
            assert!(b.width() >= 1.0 && b.height() >= 1.0);
        }
    }
}
