//! # 信念推定
//!
//! 観測された軌道から、相手（または自車）のIPVを推定します。
//!
//! 離散化した9つのIPV仮説それぞれについて軌道を生成し、観測軌道との
//! 残差をガウス尤度で評価します。尤度から求めた重みで仮説を加重平均し、
//! 事後平均IPVと重みの散らばりに基づく誤差指標を返します。
//!
//! ## 推定モード
//!
//! - **オンライン追跡**: シミュレーションの各ステップで、過去の
//!   仮説アンサンブルと相手の観測軌道（最大6ステップ）を照合
//! - **オフライン再推定**: 記録済みの区間について、相手の記録軌道を
//!   固定した単発の最適応答で仮説軌道を生成し照合
//!
//! 9仮説の求解は互いに独立なので `rayon` で並列化します。
//! `collect` は仮説の順序を保つため、集約結果は逐次計算と一致します。

use rayon::prelude::*;
use std::f64::consts::{LN_10, PI};
use tracing::trace;

use crate::game::{
    config::{BeliefConfig, IpvCandidates},
    ibr::IbrGame,
    solver::{BestResponseSolver, PlayerContext},
    GameEnvironment,
};
use crate::models::common::{Position2D, StateSample, Trajectory};

/// どの仮説も観測を支持しないときの誤差（最大値）
pub const NO_EVIDENCE_ERROR: f64 = 1.0;

/// 推定誤差の計算方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMetric {
    /// `1 − sqrt(Σ w²)`：重みが1仮説に集中すると0（オンライン追跡で使用）
    Dispersion,
    /// `1 − sqrt((Σ w)²)`：重みの総量に基づく指標（オフライン再推定で使用）
    TotalMass,
}

impl ErrorMetric {
    /// 重みから誤差を計算（`[0, 1]` に収める）
    pub fn evaluate(&self, weights: &[f64]) -> f64 {
        let error = match self {
            ErrorMetric::Dispersion => 1.0 - weights.iter().map(|w| w * w).sum::<f64>().sqrt(),
            ErrorMetric::TotalMass => 1.0 - weights.iter().sum::<f64>().powi(2).sqrt(),
        };
        error.clamp(0.0, 1.0)
    }
}

/// IPV推定結果
#[derive(Debug, Clone, PartialEq)]
pub struct IpvEstimate {
    /// 事後平均IPV（rad）
    pub ipv: f64,
    /// 誤差指標
    pub error: f64,
    /// 仮説ごとの重み（仮説集合と同じ順序）
    pub weights: Vec<f64>,
}

/// 各仮説軌道の対数尤度スコア
///
/// 軸ごと（x, y）の残差ノルムに平均0・標準偏差 `sigma` のガウス密度を適用し、
/// 密度の積の常用対数をスコアとします。負のスコアは0に切り上げます。
pub fn likelihood_scores(actual: &[Position2D], candidates: &[Vec<Position2D>], sigma: f64) -> Vec<f64> {
    let log_norm = -(sigma * (2.0 * PI).sqrt()).log10();
    let log_density = |residual: f64| log_norm - residual.powi(2) / (2.0 * sigma.powi(2)) / LN_10;

    candidates
        .iter()
        .map(|candidate| {
            let (sq_x, sq_y) = candidate
                .iter()
                .zip(actual)
                .fold((0.0, 0.0), |(sx, sy), (c, a)| {
                    (sx + (c.x - a.x).powi(2), sy + (c.y - a.y).powi(2))
                });
            let score = log_density(sq_x.sqrt()) + log_density(sq_y.sqrt());
            if score > 0.0 { score } else { 0.0 }
        })
        .collect()
}

/// スコアを重みに正規化
///
/// `score / (Σ score + epsilon)` で正規化します。全スコアが0の場合は
/// 一様な重みを返します（このとき誤差は [`NO_EVIDENCE_ERROR`]）。
pub fn normalize_weights(scores: &[f64], epsilon: f64) -> Vec<f64> {
    let total: f64 = scores.iter().sum();
    if total <= 0.0 {
        let uniform = 1.0 / scores.len().max(1) as f64;
        return vec![uniform; scores.len()];
    }
    scores.iter().map(|s| s / (total + epsilon)).collect()
}

/// IPV信念推定器
#[derive(Debug, Clone, Copy)]
pub struct BeliefEstimator<'a> {
    solver: BestResponseSolver<'a>,
    game: IbrGame<'a>,
    config: &'a BeliefConfig,
    candidates: &'a IpvCandidates,
}

impl<'a> BeliefEstimator<'a> {
    pub fn new(env: &'a GameEnvironment) -> Self {
        Self {
            solver: BestResponseSolver::new(env),
            game: IbrGame::from_env(env),
            config: &env.config().belief,
            candidates: &env.config().candidates,
        }
    }

    pub fn candidates(&self) -> &[f64] {
        self.candidates.values()
    }

    /// 相手の仮説アンサンブルを生成（オンライン追跡用）
    ///
    /// 相手のIPVを各仮説値に置き換えた仮想相手と自車とでIBRを解き、
    /// 仮想相手側の軌道を仮説順に返します。
    pub fn sample_counterpart_ensemble(
        &self,
        own: &PlayerContext<'_>,
        counterpart: &PlayerContext<'_>,
        horizon_len: usize,
    ) -> Vec<Trajectory> {
        self.candidates
            .values()
            .par_iter()
            .map(|&hypothesis| {
                let virtual_counterpart = counterpart.with_ipv(hypothesis);
                self.game.play(own, &virtual_counterpart, horizon_len).counterpart
            })
            .collect()
    }

    /// オンライン追跡での推定
    ///
    /// `ensemble` は観測窓の開始ステップで生成した仮説アンサンブル、
    /// `observed` は同じステップから始まる相手の観測軌道です。
    /// 仮説軌道は観測窓の長さに切り詰めて照合します。
    pub fn estimate_online(&self, ensemble: &[Trajectory], observed: &[StateSample]) -> IpvEstimate {
        let window = observed.len();
        let candidates: Vec<Vec<Position2D>> = ensemble.iter().map(|t| t.leading_positions(window)).collect();
        self.estimate(observed, &candidates, ErrorMetric::Dispersion)
    }

    /// オフライン再推定
    ///
    /// 対象車両のIPVを各仮説値に置き換え、相手の記録軌道を固定した最適応答で
    /// 仮説軌道を生成し、対象車両の記録軌道 `observed` と照合します。
    /// 計画長は相手の記録軌道の長さです。
    pub fn estimate_offline(
        &self,
        subject: &PlayerContext<'_>,
        counterpart_track: &Trajectory,
        observed: &[StateSample],
    ) -> IpvEstimate {
        let candidates: Vec<Vec<Position2D>> = self
            .candidates
            .values()
            .par_iter()
            .map(|&hypothesis| self.solver.solve(&subject.with_ipv(hypothesis), counterpart_track).positions())
            .collect();
        self.estimate(observed, &candidates, ErrorMetric::TotalMass)
    }

    /// 尤度重み付けによる事後平均と誤差の計算
    ///
    /// 全仮説のスコアが0なら、誤差方式によらず誤差は最大値になります。
    pub fn estimate(&self, observed: &[StateSample], candidates: &[Vec<Position2D>], metric: ErrorMetric) -> IpvEstimate {
        let actual: Vec<Position2D> = observed.iter().map(StateSample::position).collect();
        let scores = likelihood_scores(&actual, candidates, self.config.sigma);
        let evidence: f64 = scores.iter().sum();
        let weights = normalize_weights(&scores, self.config.epsilon);
        let ipv: f64 = weights
            .iter()
            .zip(self.candidates.values())
            .map(|(w, h)| w * h)
            .sum();
        let error = if evidence > 0.0 {
            metric.evaluate(&weights)
        } else {
            NO_EVIDENCE_ERROR
        };

        trace!(ipv, error, ?weights, "IPV_ESTIMATED: IPVを推定しました");

        IpvEstimate { ipv, error, weights }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::config::{GameConfig, OptimizerConfig};
    use crate::models::common::Velocity2D;
    use crate::models::reference::{GO_STRAIGHT, LEFT_TURN};
    use approx::assert_abs_diff_eq;

    fn sample(x: f64, y: f64) -> StateSample {
        StateSample::new(Position2D::new(x, y), Velocity2D::default(), 0.0)
    }

    fn observed_line(len: usize) -> Vec<StateSample> {
        (0..len).map(|i| sample(i as f64 * 0.2, 0.0)).collect()
    }

    fn shifted_ensemble(observed: &[StateSample], exact_index: Option<usize>, offset: f64) -> Vec<Trajectory> {
        (0..9)
            .map(|k| {
                let shift = if Some(k) == exact_index { 0.0 } else { offset };
                Trajectory::new(observed.iter().map(|s| sample(s.x, s.y + shift)).collect())
            })
            .collect()
    }

    fn default_env() -> GameEnvironment {
        GameEnvironment::intersection(GameConfig::default()).expect("valid config")
    }

    #[test]
    fn test_exact_match_concentrates_weight() {
        let env = default_env();
        let estimator = BeliefEstimator::new(&env);
        let observed = observed_line(5);
        let ensemble = shifted_ensemble(&observed, Some(6), 1.0);

        let estimate = estimator.estimate_online(&ensemble, &observed);
        assert_abs_diff_eq!(estimate.error, 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(estimate.ipv, 2.0 * PI / 9.0, epsilon = 1e-4);
        assert_abs_diff_eq!(estimate.weights.iter().sum::<f64>(), 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_large_identical_residuals_give_uniform_weights() {
        let env = default_env();
        let estimator = BeliefEstimator::new(&env);
        let observed = observed_line(5);
        let ensemble = shifted_ensemble(&observed, None, 5.0);

        let estimate = estimator.estimate_online(&ensemble, &observed);
        for w in &estimate.weights {
            assert_abs_diff_eq!(*w, 1.0 / 9.0, epsilon = 1e-12);
        }
        // 支持する仮説がないので誤差は最大
        assert_eq!(estimate.error, NO_EVIDENCE_ERROR);
        assert_abs_diff_eq!(estimate.ipv, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_small_identical_residuals_are_nearly_uniform() {
        let env = default_env();
        let estimator = BeliefEstimator::new(&env);
        let observed = observed_line(2);
        let ensemble = shifted_ensemble(&observed, None, 0.01);

        let estimate = estimator.estimate_online(&ensemble, &observed);
        assert!(estimate.weights.iter().all(|w| (*w - 1.0 / 9.0).abs() < 1e-5));
        assert_abs_diff_eq!(estimate.weights.iter().sum::<f64>(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_likelihood_scores_are_clamped_and_ordered() {
        let actual = vec![Position2D::new(0.0, 0.0), Position2D::new(1.0, 0.0)];
        let near = vec![Position2D::new(0.0, 0.01), Position2D::new(1.0, 0.01)];
        let far = vec![Position2D::new(0.0, 3.0), Position2D::new(1.0, 3.0)];
        let scores = likelihood_scores(&actual, &[actual.clone(), near, far], PI / 40.0);

        assert!(scores[0] > scores[1]);
        assert!(scores[1] > 0.0);
        assert_eq!(scores[2], 0.0);
        // 残差0のとき各軸の密度は 1/(σ√2π)
        let peak = 2.0 * (1.0 / (PI / 40.0 * (2.0 * PI).sqrt())).log10();
        assert_abs_diff_eq!(scores[0], peak, epsilon = 1e-12);
    }

    #[test]
    fn test_error_metrics_differ() {
        let weights = [0.5, 0.5];
        assert_abs_diff_eq!(ErrorMetric::Dispersion.evaluate(&weights), 1.0 - 0.5_f64.sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(ErrorMetric::TotalMass.evaluate(&weights), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_error_is_clamped_to_unit_interval() {
        // 丸め誤差で総量が1をわずかに超えても負にならない
        let weights = [1.0 / 3.0 + 1e-15; 3];
        assert_eq!(ErrorMetric::TotalMass.evaluate(&weights), 0.0);
        assert_eq!(ErrorMetric::Dispersion.evaluate(&[]), 1.0);
    }

    fn offline_env() -> GameEnvironment {
        let mut config = GameConfig {
            track_len: 5,
            optimizer: OptimizerConfig {
                max_iterations: 30,
                ..OptimizerConfig::default()
            },
            ..GameConfig::default()
        };
        config.belief.window_steps = 5;
        GameEnvironment::intersection(config).expect("valid config")
    }

    fn gs_start() -> StateSample {
        StateSample::new(Position2D::new(20.0, -2.0), Velocity2D::new(-2.0, 0.0), PI)
    }

    fn lt_track(env: &GameEnvironment) -> Trajectory {
        let lt_start = StateSample::new(Position2D::new(13.0, -7.0), Velocity2D::new(0.0, 2.0), PI / 3.0);
        env.propagate(&lt_start, &Default::default(), 5)
    }

    #[test]
    fn test_offline_estimate_weights_are_normalized() {
        let env = offline_env();
        let estimator = BeliefEstimator::new(&env);
        let gs_path = env.reference_path(GO_STRAIGHT).expect("gs");
        let lt_track = lt_track(&env);
        let subject = PlayerContext::new(gs_start(), 0.0, gs_path);
        // IPV 0 の最適応答そのものを記録軌道とする
        let gs_observed = BestResponseSolver::new(&env).solve(&subject, &lt_track);

        let estimate = estimator.estimate_offline(&subject, &lt_track, gs_observed.samples());
        assert_eq!(estimate.weights.len(), 9);
        assert!(estimate.weights.iter().all(|w| *w >= 0.0));
        assert_abs_diff_eq!(estimate.weights.iter().sum::<f64>(), 1.0, epsilon = 1e-4);
        assert!(estimate.ipv.abs() <= 4.0 * PI / 9.0 + 1e-12);
        // オフライン方式は重みの総量で誤差を測る
        assert_abs_diff_eq!(estimate.error, ErrorMetric::TotalMass.evaluate(&estimate.weights), epsilon = 1e-12);
        assert!((0.0..1e-3).contains(&estimate.error), "error = {}", estimate.error);
    }

    #[test]
    fn test_offline_estimate_without_evidence_reports_maximum_error() {
        let env = offline_env();
        let estimator = BeliefEstimator::new(&env);
        let gs_path = env.reference_path(GO_STRAIGHT).expect("gs");
        let lt_track = lt_track(&env);
        let subject = PlayerContext::new(gs_start(), 0.0, gs_path);
        // どの仮説軌道からも100m離れた記録軌道
        let far_observed: Vec<StateSample> = env
            .propagate(&gs_start(), &Default::default(), 5)
            .samples()
            .iter()
            .map(|s| StateSample { y: s.y + 100.0, ..*s })
            .collect();

        let estimate = estimator.estimate_offline(&subject, &lt_track, &far_observed);
        assert_eq!(estimate.error, NO_EVIDENCE_ERROR);
        for w in &estimate.weights {
            assert_abs_diff_eq!(*w, 1.0 / 9.0, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(estimate.ipv, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_counterpart_ensemble_has_one_track_per_hypothesis() {
        let mut config = GameConfig {
            track_len: 4,
            optimizer: OptimizerConfig {
                max_iterations: 20,
                ..OptimizerConfig::default()
            },
            ..GameConfig::default()
        };
        config.belief.window_steps = 4;
        config.ibr.max_iterations = 2;
        let env = GameEnvironment::intersection(config).expect("valid config");
        let estimator = BeliefEstimator::new(&env);

        let own = PlayerContext::new(
            StateSample::new(Position2D::new(13.0, -7.0), Velocity2D::new(0.0, 2.0), PI / 3.0),
            PI / 3.0,
            env.reference_path(LEFT_TURN).expect("lt"),
        );
        let counterpart = PlayerContext::new(
            StateSample::new(Position2D::new(20.0, -2.0), Velocity2D::new(-2.0, 0.0), PI),
            0.0,
            env.reference_path(GO_STRAIGHT).expect("gs"),
        );

        let ensemble = estimator.sample_counterpart_ensemble(&own, &counterpart, 4);
        assert_eq!(ensemble.len(), 9);
        assert!(ensemble.iter().all(|t| t.len() == 4));
        // 並列化しても仮説順に並ぶ
        let again = estimator.sample_counterpart_ensemble(&own, &counterpart, 4);
        assert_eq!(ensemble, again);
    }
}
