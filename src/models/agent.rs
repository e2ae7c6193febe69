use std::collections::VecDeque;

use tracing::{debug, info};

use crate::game::{
    belief::{BeliefEstimator, IpvEstimate},
    ibr::{IbrGame, IbrTermination},
    solver::PlayerContext,
    GameEnvironment, GameError,
};
use crate::models::common::{Position2D, StateSample, Trajectory, Velocity2D};

/// 車両の運動状態と走行目標
#[derive(Debug, Clone, PartialEq)]
pub struct AgentState {
    pub position: Position2D,
    pub velocity: Velocity2D,
    /// 方位角（rad）
    pub heading: f64,
    /// 走行目標ラベル（参照経路の名前）
    pub target: String,
}

impl AgentState {
    pub fn new(position: Position2D, velocity: Velocity2D, heading: f64, target: impl Into<String>) -> Self {
        Self {
            position,
            velocity,
            heading,
            target: target.into(),
        }
    }

    pub fn to_sample(&self) -> StateSample {
        StateSample::new(self.position, self.velocity, self.heading)
    }

    /// 軌道サンプルで運動状態を更新（走行目標は維持）
    pub fn apply_sample(&mut self, sample: &StateSample) {
        self.position = sample.position();
        self.velocity = sample.velocity();
        self.heading = sample.heading;
    }
}

/// 相手IPVに関する信念
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BeliefState {
    /// 現在のIPV推定値
    pub ipv: f64,
    /// 推定値の履歴
    pub ipv_history: Vec<f64>,
    /// 推定誤差の履歴
    pub error_history: Vec<f64>,
    /// 生成ステップと仮説アンサンブル（仮説順に9本）の組。古い順
    ensembles: VecDeque<(usize, Vec<Trajectory>)>,
}

impl BeliefState {
    pub fn new(initial_guess: f64) -> Self {
        Self {
            ipv: initial_guess,
            ..Self::default()
        }
    }

    /// 推定結果を反映
    pub fn record(&mut self, estimate: &IpvEstimate) {
        self.ipv = estimate.ipv;
        self.ipv_history.push(estimate.ipv);
        self.error_history.push(estimate.error);
    }

    pub fn last_error(&self) -> Option<f64> {
        self.error_history.last().copied()
    }

    /// `step` で生成した仮説アンサンブルを記録
    pub fn push_ensemble(&mut self, step: usize, ensemble: Vec<Trajectory>) {
        self.ensembles.push_back((step, ensemble));
    }

    /// `step` で生成した仮説アンサンブル
    pub fn ensemble_at(&self, step: usize) -> Option<&[Trajectory]> {
        self.ensembles
            .iter()
            .find(|(recorded, _)| *recorded == step)
            .map(|(_, ensemble)| ensemble.as_slice())
    }

    /// `step` より前に生成したアンサンブルを破棄
    pub fn discard_ensembles_before(&mut self, step: usize) {
        while self.ensembles.front().is_some_and(|(recorded, _)| *recorded < step) {
            self.ensembles.pop_front();
        }
    }

    /// 保持しているアンサンブル数
    pub fn ensemble_count(&self) -> usize {
        self.ensembles.len()
    }
}

/// 相手車両の内部モデル
///
/// 実車両が保持する相手の推定像です。運動状態は実際の相手に追従させ、
/// IPVは信念推定で更新します。
#[derive(Debug, Clone, PartialEq)]
pub struct BeliefModel {
    pub state: AgentState,
    /// 直近のIBRで予測した相手の計画軌道
    pub plan: Option<Trajectory>,
    pub belief: BeliefState,
}

impl BeliefModel {
    pub fn new(state: AgentState, initial_guess: f64) -> Self {
        Self {
            state,
            plan: None,
            belief: BeliefState::new(initial_guess),
        }
    }

    pub fn ipv(&self) -> f64 {
        self.belief.ipv
    }

    /// 推定IPVによる求解コンテキスト
    pub fn context<'e>(&self, env: &'e GameEnvironment) -> Result<PlayerContext<'e>, GameError> {
        let path = env.reference_path(&self.state.target)?;
        Ok(PlayerContext::new(self.state.to_sample(), self.belief.ipv, path))
    }
}

/// 実車両エージェント
///
/// 真のIPVで行動し、相手の内部モデルに対してIBRで計画を立てます。
/// 観測ログは1ステップに1サンプルずつ追記され、切り詰められることはありません。
#[derive(Debug, Clone)]
pub struct RealAgent {
    pub id: String,
    state: AgentState,
    ipv: f64,
    observed: Vec<StateSample>,
    plan: Option<Trajectory>,
    plan_history: Vec<Trajectory>,
    counterpart: BeliefModel,
}

impl RealAgent {
    /// 新しいエージェントを作成
    ///
    /// # 引数
    ///
    /// * `id` - エージェント識別子
    /// * `state` - 初期状態と走行目標
    /// * `ipv` - 真のIPV（rad）
    /// * `counterpart` - 相手の内部モデル（初期状態と初期IPV推定）
    pub fn new(id: impl Into<String>, state: AgentState, ipv: f64, counterpart: BeliefModel) -> Self {
        let initial = state.to_sample();
        Self {
            id: id.into(),
            state,
            ipv,
            observed: vec![initial],
            plan: None,
            plan_history: Vec::new(),
            counterpart,
        }
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn ipv(&self) -> f64 {
        self.ipv
    }

    pub fn observed(&self) -> &[StateSample] {
        &self.observed
    }

    /// 観測ログを軌道として取り出す
    pub fn observed_track(&self) -> Trajectory {
        Trajectory::new(self.observed.clone())
    }

    pub fn plan(&self) -> Option<&Trajectory> {
        self.plan.as_ref()
    }

    pub fn plan_history(&self) -> &[Trajectory] {
        &self.plan_history
    }

    pub fn counterpart_model(&self) -> &BeliefModel {
        &self.counterpart
    }

    /// 経過ステップ数（観測ログ長 − 1）
    pub fn elapsed_steps(&self) -> usize {
        self.observed.len().saturating_sub(1)
    }

    /// 真のIPVによる求解コンテキスト
    pub fn context<'e>(&self, env: &'e GameEnvironment) -> Result<PlayerContext<'e>, GameError> {
        let path = env.reference_path(&self.state.target)?;
        Ok(PlayerContext::new(self.state.to_sample(), self.ipv, path))
    }

    /// 相手の仮説アンサンブルを生成して信念に記録
    ///
    /// 各IPV仮説の仮想相手と自車とのIBRを解き、仮想相手側の軌道を現在の
    /// 経過ステップと組にして保存します。オンライン推定はここで記録した
    /// アンサンブルを後のステップで参照し、観測窓より古いものは破棄します。
    pub fn sample_hypotheses(&mut self, env: &GameEnvironment) -> Result<(), GameError> {
        let own = self.context(env)?;
        let counterpart = self.counterpart.context(env)?;
        let ensemble =
            BeliefEstimator::new(env).sample_counterpart_ensemble(&own, &counterpart, env.config().track_len);

        debug!(
            agent_id = %self.id,
            step = self.elapsed_steps(),
            hypotheses = ensemble.len(),
            "ENSEMBLE_SAMPLED: 相手の仮説アンサンブルを生成しました"
        );

        let step = self.elapsed_steps();
        self.counterpart.belief.push_ensemble(step, ensemble);
        Ok(())
    }

    /// 相手の内部モデルとのIBRで計画を更新
    pub fn plan_step(&mut self, env: &GameEnvironment) -> Result<IbrTermination, GameError> {
        let own = self.context(env)?;
        let counterpart = self.counterpart.context(env)?;
        let outcome = IbrGame::from_env(env).play(&own, &counterpart, env.config().track_len);

        debug!(
            agent_id = %self.id,
            step = self.elapsed_steps(),
            iterations = outcome.iterations,
            termination = ?outcome.termination,
            "PLAN_UPDATED: 計画軌道を更新しました"
        );

        self.plan = Some(outcome.own);
        self.counterpart.plan = Some(outcome.counterpart);
        Ok(outcome.termination)
    }

    /// 1ステップ前進し、相手のIPV推定を更新
    ///
    /// 計画の2サンプル目を新しい状態として確定し、観測ログと計画履歴に追記します。
    /// 相手の内部モデルは実際の相手の計画の2サンプル目に合わせます。
    /// 2ステップ以上経過していれば、直近の観測窓でオンライン推定を行います。
    ///
    /// # 戻り値
    ///
    /// 推定を行った場合はその結果
    pub fn advance(&mut self, counterpart: &RealAgent, env: &GameEnvironment) -> Option<IpvEstimate> {
        let next = self.next_sample();
        self.state.apply_sample(&next);
        self.observed.push(next);
        if let Some(plan) = &self.plan {
            self.plan_history.push(plan.clone());
        }

        let counterpart_next = counterpart.next_sample();
        self.counterpart.state.apply_sample(&counterpart_next);

        self.update_belief(counterpart, env)
    }

    /// 計画の2サンプル目（計画がなければ現在状態）
    fn next_sample(&self) -> StateSample {
        self.plan
            .as_ref()
            .and_then(|plan| plan.sample(1).copied())
            .unwrap_or_else(|| self.state.to_sample())
    }

    /// 観測窓によるオンライン推定
    fn update_belief(&mut self, counterpart: &RealAgent, env: &GameEnvironment) -> Option<IpvEstimate> {
        let current = self.elapsed_steps();
        if current <= 1 {
            return None;
        }

        // 観測窓の開始ステップは単調に増えるので、それより古いものは不要
        let start = current.saturating_sub(env.config().belief.window_steps);
        self.counterpart.belief.discard_ensembles_before(start);
        let Some(ensemble) = self.counterpart.belief.ensemble_at(start) else {
            debug!(
                agent_id = %self.id,
                window_start = start,
                "BELIEF_SKIPPED: 観測窓の開始時点のアンサンブルがありません"
            );
            return None;
        };
        let Some(window) = counterpart.observed.get(start..current) else {
            debug!(
                agent_id = %self.id,
                window_start = start,
                "BELIEF_SKIPPED: 相手の観測ログが不足しています"
            );
            return None;
        };

        let estimate = BeliefEstimator::new(env).estimate_online(ensemble, window);
        self.counterpart.belief.record(&estimate);

        info!(
            agent_id = %self.id,
            counterpart_id = %counterpart.id,
            step = current,
            ipv_estimate = estimate.ipv,
            ipv_error = estimate.error,
            "IPV_UPDATED: 相手のIPV推定を更新しました"
        );

        Some(estimate)
    }
}
