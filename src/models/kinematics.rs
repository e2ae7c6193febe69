use crate::models::{
    common::{math_utils, ControlInput, ControlSequence, StateSample, Trajectory, Velocity2D},
    traits::KinematicModel,
};

/// 自転車モデルによる運動学積分
///
/// 状態 `(x, y, vx, vy, heading)` の速さと方位角を用いて前進オイラー積分します。
/// 後退は扱わず、速さは0で下限クリップされます。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BicycleModel {
    /// ホイールベース（m）
    pub wheelbase: f64,
}

impl Default for BicycleModel {
    fn default() -> Self {
        Self { wheelbase: 2.5 }
    }
}

impl BicycleModel {
    pub fn new(wheelbase: f64) -> Self {
        Self { wheelbase }
    }

    /// 1ステップの積分
    fn step(&self, state: &StateSample, input: &ControlInput, dt: f64) -> StateSample {
        let speed = state.speed();
        let x = state.x + speed * state.heading.cos() * dt;
        let y = state.y + speed * state.heading.sin() * dt;
        let yaw_rate = speed / self.wheelbase * input.steering.tan();
        let heading = math_utils::normalize_angle(state.heading + yaw_rate * dt);
        let next_speed = (speed + input.acceleration * dt).max(0.0);
        let velocity = Velocity2D::from_heading(next_speed, heading);

        StateSample {
            x,
            y,
            vx: velocity.x,
            vy: velocity.y,
            heading,
        }
    }
}

impl KinematicModel for BicycleModel {
    fn propagate(
        &self,
        initial: &StateSample,
        controls: &ControlSequence,
        horizon_len: usize,
        dt: f64,
    ) -> Trajectory {
        let mut samples = Vec::with_capacity(horizon_len);
        if horizon_len == 0 {
            return Trajectory::new(samples);
        }

        let mut state = *initial;
        samples.push(state);
        for i in 0..horizon_len - 1 {
            let input = controls.get(i).copied().unwrap_or_default();
            state = self.step(&state, &input, dt);
            samples.push(state);
        }

        Trajectory::new(samples)
    }
}
