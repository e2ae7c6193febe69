//! # 反復最適応答（IBR）
//!
//! 自車と相手の2つの役割が交互に最適応答を計算する状態機械です。
//!
//! 1. 両者の軌道推定を現在位置の停止軌道で初期化
//! 2. 自車 ← 相手軌道への最適応答、続いて 相手 ← 自車軌道への最適応答
//! 3. 自車の位置列の変化量がしきい値未満なら収束
//! 4. 反復回数が上限を超えたら打ち切り（正常終了として扱う）

use tracing::{debug, trace};

use crate::game::{
    config::IbrPolicy,
    solver::{BestResponseSolver, PlayerContext},
};
use crate::models::common::Trajectory;

/// IBRの終了理由
///
/// 打ち切りも許容できる均衡として扱い、呼び出し側は両者を区別しません。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IbrTermination {
    Converged,
    IterationCap,
}

/// IBRの結果
#[derive(Debug, Clone, PartialEq)]
pub struct IbrOutcome {
    /// 自車の計画軌道
    pub own: Trajectory,
    /// 相手の計画軌道
    pub counterpart: Trajectory,
    pub iterations: usize,
    pub termination: IbrTermination,
}

/// 状態機械の状態
#[derive(Debug, Clone, PartialEq)]
enum IbrState {
    /// 反復中（次の反復番号と現在の推定軌道）
    Iterating {
        iteration: usize,
        own: Trajectory,
        counterpart: Trajectory,
    },
    /// 終了
    Finished(IbrOutcome),
}

/// 2者間の反復最適応答ゲーム
#[derive(Debug, Clone, Copy)]
pub struct IbrGame<'a> {
    solver: BestResponseSolver<'a>,
    policy: IbrPolicy,
}

impl<'a> IbrGame<'a> {
    pub fn new(solver: BestResponseSolver<'a>, policy: IbrPolicy) -> Self {
        Self { solver, policy }
    }

    /// 環境の既定方針でゲームを作成
    pub fn from_env(env: &'a crate::game::GameEnvironment) -> Self {
        Self::new(BestResponseSolver::new(env), env.config().ibr)
    }

    pub fn policy(&self) -> &IbrPolicy {
        &self.policy
    }

    /// 停止軌道を初期推定としてゲームを解く
    pub fn play(&self, own: &PlayerContext<'_>, counterpart: &PlayerContext<'_>, horizon_len: usize) -> IbrOutcome {
        self.play_from(
            own,
            counterpart,
            own.stationary(horizon_len),
            counterpart.stationary(horizon_len),
        )
    }

    /// 初期推定軌道を指定してゲームを解く
    pub fn play_from(
        &self,
        own: &PlayerContext<'_>,
        counterpart: &PlayerContext<'_>,
        own_guess: Trajectory,
        counterpart_guess: Trajectory,
    ) -> IbrOutcome {
        let mut state = IbrState::Iterating {
            iteration: 1,
            own: own_guess,
            counterpart: counterpart_guess,
        };

        loop {
            state = match state {
                IbrState::Iterating {
                    iteration,
                    own: own_trj,
                    counterpart: counterpart_trj,
                } => self.transition(own, counterpart, iteration, own_trj, counterpart_trj),
                IbrState::Finished(outcome) => {
                    debug!(
                        own_ipv = own.ipv,
                        counterpart_ipv = counterpart.ipv,
                        iterations = outcome.iterations,
                        termination = ?outcome.termination,
                        "IBR_FINISHED: 反復最適応答が終了しました"
                    );
                    return outcome;
                }
            };
        }
    }

    /// 1反復分の状態遷移
    fn transition(
        &self,
        own: &PlayerContext<'_>,
        counterpart: &PlayerContext<'_>,
        iteration: usize,
        last_own: Trajectory,
        last_counterpart: Trajectory,
    ) -> IbrState {
        let own_trj = self.solver.solve(own, &last_counterpart);
        let counterpart_trj = self.solver.solve(counterpart, &own_trj);
        let change = own_trj.position_change_norm(&last_own);

        trace!(iteration, change, "IBR_ITERATION: 最適応答を更新しました");

        let termination = if change < self.policy.tolerance {
            Some(IbrTermination::Converged)
        } else if iteration > self.policy.max_iterations {
            Some(IbrTermination::IterationCap)
        } else {
            None
        };

        match termination {
            Some(termination) => IbrState::Finished(IbrOutcome {
                own: own_trj,
                counterpart: counterpart_trj,
                iterations: iteration,
                termination,
            }),
            None => IbrState::Iterating {
                iteration: iteration + 1,
                own: own_trj,
                counterpart: counterpart_trj,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::config::{GameConfig, OptimizerConfig};
    use crate::game::GameEnvironment;
    use crate::models::{
        common::{Position2D, StateSample, Velocity2D},
        kinematics::BicycleModel,
        reference::{PathLibrary, ReferencePath, GO_STRAIGHT, LEFT_TURN},
    };
    use std::f64::consts::PI;

    fn reduced_config(track_len: usize) -> GameConfig {
        let mut config = GameConfig {
            track_len,
            optimizer: OptimizerConfig {
                max_iterations: 60,
                ..OptimizerConfig::default()
            },
            ..GameConfig::default()
        };
        config.belief.window_steps = config.belief.window_steps.min(track_len);
        config
    }

    fn parallel_lanes_env(track_len: usize) -> GameEnvironment {
        let mut library = PathLibrary::new();
        library.insert(
            "north",
            ReferencePath::from_waypoints(&[Position2D::new(0.0, -20.0), Position2D::new(0.0, 40.0)], 0.1),
        );
        library.insert(
            "south",
            ReferencePath::from_waypoints(&[Position2D::new(10.0, 40.0), Position2D::new(10.0, -20.0)], 0.1),
        );
        GameEnvironment::new(
            reduced_config(track_len),
            Box::new(BicycleModel::default()),
            Box::new(library),
        )
        .expect("valid config")
    }

    #[test]
    fn test_selfish_agents_on_separate_lanes_converge() {
        let env = parallel_lanes_env(6);
        let game = IbrGame::from_env(&env);
        let north_state = StateSample::new(Position2D::new(0.0, 0.0), Velocity2D::new(0.0, 2.0), PI / 2.0);
        let south_state = StateSample::new(Position2D::new(10.0, 10.0), Velocity2D::new(0.0, -2.0), -PI / 2.0);
        let north = PlayerContext::new(north_state, 0.0, env.reference_path("north").expect("north"));
        let south = PlayerContext::new(south_state, 0.0, env.reference_path("south").expect("south"));

        let outcome = game.play(&north, &south, 6);
        assert_eq!(outcome.termination, IbrTermination::Converged);
        assert!(outcome.iterations < 10);
        assert_eq!(outcome.own.len(), 6);
        assert_eq!(outcome.counterpart.len(), 6);

        // 惰行なら0.5秒で1.0m、上限加速なら1.3m。加速しつつ車線上に留まる
        let own_last = outcome.own.last().copied().unwrap_or_default();
        assert!(own_last.y > 1.15, "north progress {}", own_last.y);
        assert!(own_last.x.abs() < 0.5);
        let other_last = outcome.counterpart.last().copied().unwrap_or_default();
        assert!(other_last.y < 10.0 - 1.15, "south progress {}", other_last.y);
        assert!((other_last.x - 10.0).abs() < 0.5);
    }

    #[test]
    fn test_left_turn_scenario_stays_bounded() {
        let env = GameEnvironment::intersection(reduced_config(10)).expect("valid config");
        let game = IbrGame::from_env(&env);
        let lt_path = env.reference_path(LEFT_TURN).expect("lt");
        let gs_path = env.reference_path(GO_STRAIGHT).expect("gs");
        let lt = PlayerContext::new(
            StateSample::new(Position2D::new(13.0, -7.0), Velocity2D::new(0.0, 2.0), PI / 3.0),
            PI / 3.0,
            lt_path,
        );
        let gs = PlayerContext::new(
            StateSample::new(Position2D::new(20.0, -2.0), Velocity2D::new(-2.0, 0.0), PI),
            0.0,
            gs_path,
        );

        let outcome = game.play(&lt, &gs, 10);
        assert_eq!(outcome.own.len(), 10);
        assert_eq!(outcome.counterpart.len(), 10);
        assert!(outcome.iterations <= env.config().ibr.max_iterations + 1);
        assert!(outcome
            .own
            .samples()
            .iter()
            .chain(outcome.counterpart.samples())
            .all(|s| s.x.is_finite() && s.y.is_finite()));

        let cost = env.cost_model();
        let deviation = cost.interior_terms(&outcome.own, lt_path).mean_deviation;
        assert!(deviation < 1.5, "mean deviation {deviation}");
    }

    #[test]
    fn test_iteration_cap_is_a_normal_termination() {
        let mut config = reduced_config(4);
        config.ibr = IbrPolicy {
            tolerance: 1e-3,
            max_iterations: 0,
        };
        let env = GameEnvironment::intersection(config).expect("valid config");
        let game = IbrGame::from_env(&env);
        let lt = PlayerContext::new(
            StateSample::new(Position2D::new(13.0, -7.0), Velocity2D::new(0.0, 2.0), PI / 3.0),
            PI / 3.0,
            env.reference_path(LEFT_TURN).expect("lt"),
        );
        let gs = PlayerContext::new(
            StateSample::new(Position2D::new(20.0, -2.0), Velocity2D::new(-2.0, 0.0), PI),
            0.0,
            env.reference_path(GO_STRAIGHT).expect("gs"),
        );

        // 停止軌道からは必ず動くため、1反復目で上限超過により打ち切られる
        let outcome = game.play(&lt, &gs, 4);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.termination, IbrTermination::IterationCap);
        assert_eq!(outcome.own.len(), 4);
    }

    #[test]
    fn test_ibr_is_deterministic() {
        let env = parallel_lanes_env(4);
        let game = IbrGame::from_env(&env);
        let north = PlayerContext::new(
            StateSample::new(Position2D::new(0.0, 0.0), Velocity2D::new(0.0, 1.0), PI / 2.0),
            PI / 4.0,
            env.reference_path("north").expect("north"),
        );
        let south = PlayerContext::new(
            StateSample::new(Position2D::new(10.0, 5.0), Velocity2D::new(0.0, -1.0), -PI / 2.0),
            -PI / 6.0,
            env.reference_path("south").expect("south"),
        );
        assert_eq!(game.play(&north, &south, 4), game.play(&north, &south, 4));
    }
}
