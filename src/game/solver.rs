use tracing::{debug, trace};

use crate::game::{
    cost::CostModel,
    optimizer::{BoundedMinimizer, OptimizeResult},
    GameEnvironment,
};
use crate::models::{
    common::{ControlSequence, StateSample, Trajectory},
    reference::ReferencePath,
};

/// 1台分の求解コンテキスト
///
/// 状態・IPV・参照経路だけを持つ値型で、仮説ごとに複製して独立に解けます。
#[derive(Debug, Clone, Copy)]
pub struct PlayerContext<'a> {
    /// 現在の実状態（軌道の初期状態）
    pub state: StateSample,
    /// IPV（rad）
    pub ipv: f64,
    /// 走行目標の参照経路
    pub path: &'a ReferencePath,
}

impl<'a> PlayerContext<'a> {
    pub fn new(state: StateSample, ipv: f64, path: &'a ReferencePath) -> Self {
        Self { state, ipv, path }
    }

    /// IPVだけを差し替えた仮説コンテキスト
    pub fn with_ipv(&self, ipv: f64) -> Self {
        Self { ipv, ..*self }
    }

    /// 現在位置に留まる初期推定軌道
    pub fn stationary(&self, horizon_len: usize) -> Trajectory {
        Trajectory::stationary(self.state, horizon_len)
    }
}

/// 効用関数の構築
///
/// 相手軌道を固定したうえで、平坦化された入力列を
/// `cos(ipv)·内部コスト + sin(ipv)·集団コスト` に写す関数を返します。
/// 副作用はなく、最適化器から何度でも呼び出せます。
pub fn utility<'a>(
    env: &'a GameEnvironment,
    cost: &'a CostModel,
    player: PlayerContext<'a>,
    counterpart: &'a Trajectory,
) -> impl Fn(&[f64]) -> f64 + 'a {
    let horizon_len = counterpart.len();
    move |flat: &[f64]| {
        let controls = ControlSequence::from_flat(flat);
        let own = env.propagate(&player.state, &controls, horizon_len);
        let interior = cost.interior_cost(&own, player.path);
        let group = cost.group_cost(&own, counterpart);
        cost.blend(player.ipv, interior, group)
    }
}

/// 最適応答の詳細結果
#[derive(Debug, Clone, PartialEq)]
pub struct BestResponse {
    pub trajectory: Trajectory,
    pub controls: ControlSequence,
    /// 最適化後の効用（最小化値）
    pub utility: f64,
    pub converged: bool,
}

/// 最適応答ソルバー
///
/// 相手軌道を固定し、自車の入力列について効用を箱型制約下で最小化します。
#[derive(Debug, Clone, Copy)]
pub struct BestResponseSolver<'a> {
    env: &'a GameEnvironment,
    cost: CostModel,
    minimizer: BoundedMinimizer,
}

impl<'a> BestResponseSolver<'a> {
    pub fn new(env: &'a GameEnvironment) -> Self {
        Self {
            env,
            cost: env.cost_model(),
            minimizer: BoundedMinimizer::new(env.config().optimizer),
        }
    }

    pub fn env(&self) -> &'a GameEnvironment {
        self.env
    }

    /// 最適応答軌道を求める
    pub fn solve(&self, player: &PlayerContext<'_>, counterpart: &Trajectory) -> Trajectory {
        self.solve_detailed(player, counterpart).trajectory
    }

    /// 最適応答を求め、入力列や収束状況も返す
    ///
    /// 計画長は相手軌道の長さに合わせます。最適化が収束しなかった場合でも
    /// 最良点を採用し、エラーは返しません。
    pub fn solve_detailed(&self, player: &PlayerContext<'_>, counterpart: &Trajectory) -> BestResponse {
        let horizon_len = counterpart.len();
        if horizon_len < 2 {
            return BestResponse {
                trajectory: player.stationary(horizon_len),
                controls: ControlSequence::zeros(0),
                utility: 0.0,
                converged: true,
            };
        }

        let steps = horizon_len - 1;
        let bounds = self.env.config().bounds;
        let objective = utility(self.env, &self.cost, *player, counterpart);
        let x0 = vec![0.0; 2 * steps];
        let result: OptimizeResult = self.minimizer.minimize(&objective, &x0, &bounds.flat_bounds(steps));

        if !result.converged() {
            debug!(
                ipv = player.ipv,
                iterations = result.iterations,
                termination = ?result.termination,
                utility = result.fun,
                "OPTIMIZER_NOT_CONVERGED: 最適化が収束しなかったため最良点を採用します"
            );
        } else {
            trace!(
                ipv = player.ipv,
                iterations = result.iterations,
                evaluations = result.evaluations,
                utility = result.fun,
                "BEST_RESPONSE_SOLVED: 最適応答を求めました"
            );
        }

        let controls = ControlSequence::from_flat(&result.x).clamped(&bounds);
        let trajectory = self.env.propagate(&player.state, &controls, horizon_len);

        BestResponse {
            trajectory,
            controls,
            utility: result.fun,
            converged: result.converged(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::config::{GameConfig, OptimizerConfig};
    use crate::models::common::{Position2D, Velocity2D};
    use crate::models::reference::{GO_STRAIGHT, LEFT_TURN};
    use std::f64::consts::PI;

    fn env_with(track_len: usize) -> GameEnvironment {
        let mut config = GameConfig {
            track_len,
            optimizer: OptimizerConfig {
                max_iterations: 40,
                ..OptimizerConfig::default()
            },
            ..GameConfig::default()
        };
        config.belief.window_steps = config.belief.window_steps.min(track_len);
        GameEnvironment::intersection(config).expect("valid config")
    }

    fn gs_state() -> StateSample {
        StateSample::new(Position2D::new(20.0, -2.0), Velocity2D::new(-2.0, 0.0), PI)
    }

    fn lt_state() -> StateSample {
        StateSample::new(Position2D::new(13.0, -7.0), Velocity2D::new(0.0, 2.0), PI / 3.0)
    }

    #[test]
    fn test_utility_at_zero_controls_matches_cost_model() {
        let env = env_with(6);
        let cost = env.cost_model();
        let path = env.reference_path(LEFT_TURN).expect("lt");
        let player = PlayerContext::new(lt_state(), PI / 3.0, path);
        let other = Trajectory::stationary(gs_state(), 6);

        let f = utility(&env, &cost, player, &other);
        let own = env.propagate(&player.state, &ControlSequence::zeros(5), 6);
        let expected = (PI / 3.0).cos() * cost.interior_cost(&own, path)
            + (PI / 3.0).sin() * cost.group_cost(&own, &other);
        assert_eq!(f(&[0.0; 10]), expected);
    }

    #[test]
    fn test_solution_shape_and_bounds() {
        for track_len in [2, 3, 5] {
            let env = env_with(track_len);
            let solver = BestResponseSolver::new(&env);
            let path = env.reference_path(GO_STRAIGHT).expect("gs");
            let player = PlayerContext::new(gs_state(), 0.0, path);
            let other = Trajectory::stationary(lt_state(), track_len);

            let response = solver.solve_detailed(&player, &other);
            assert_eq!(response.trajectory.len(), track_len);
            assert_eq!(response.controls.len(), track_len - 1);
            assert!(response.controls.is_within(&env.config().bounds));
            assert_eq!(response.trajectory.first(), Some(&gs_state()));
        }
    }

    #[test]
    fn test_best_response_is_deterministic() {
        let env = env_with(5);
        let solver = BestResponseSolver::new(&env);
        let path = env.reference_path(LEFT_TURN).expect("lt");
        let player = PlayerContext::new(lt_state(), PI / 3.0, path);
        let other = Trajectory::stationary(gs_state(), 5);

        let first = solver.solve(&player, &other);
        let second = solver.solve(&player, &other);
        assert_eq!(first, second);
    }

    /// 西向きに走った距離
    fn westward_travel(trajectory: &Trajectory) -> f64 {
        match (trajectory.first(), trajectory.last()) {
            (Some(first), Some(last)) => first.x - last.x,
            _ => 0.0,
        }
    }

    #[test]
    fn test_selfish_response_beats_coasting() {
        let env = env_with(6);
        let solver = BestResponseSolver::new(&env);
        let cost = env.cost_model();
        let path = env.reference_path(GO_STRAIGHT).expect("gs");
        let player = PlayerContext::new(gs_state(), 0.0, path);
        let other = Trajectory::stationary(lt_state(), 6);

        let coasting = env.propagate(&player.state, &ControlSequence::zeros(5), 6);
        let coasting_utility = utility(&env, &cost, player, &other)(&[0.0; 10]);
        let solved = solver.solve_detailed(&player, &other);

        // 惰行は 1.0m、全力加速なら 1.3m
        assert!(
            westward_travel(&solved.trajectory) > westward_travel(&coasting) + 0.15,
            "travel = {}",
            westward_travel(&solved.trajectory)
        );
        assert!(solved.utility < coasting_utility - 0.2, "utility = {}", solved.utility);
        assert!(cost.interior_cost(&solved.trajectory, path) < cost.interior_cost(&coasting, path));
    }

    #[test]
    fn test_selfish_straight_agent_accelerates_with_default_config() {
        let env = GameEnvironment::intersection(GameConfig::default()).expect("valid config");
        let solver = BestResponseSolver::new(&env);
        let cost = env.cost_model();
        let path = env.reference_path(GO_STRAIGHT).expect("gs");
        let player = PlayerContext::new(gs_state(), 0.0, path);
        let other = Trajectory::stationary(lt_state(), 10);

        let steps = 9;
        let coasting_utility = utility(&env, &cost, player, &other)(vec![0.0; 2 * steps].as_slice());
        let solved = solver.solve_detailed(&player, &other);

        // 惰行 1.8m に対し、上限加速を続ければ約 2.9m 進める
        assert!(solved.utility < coasting_utility - 0.5, "utility = {}", solved.utility);
        assert!(westward_travel(&solved.trajectory) > 2.3);
        let mean_accel = solved.controls.to_flat().iter().take(steps).sum::<f64>() / steps as f64;
        assert!(mean_accel > 1.0, "mean accel = {mean_accel}");
    }
}
