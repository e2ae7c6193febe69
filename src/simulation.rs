//! # Simulation モジュール
//!
//! 2台の車両が互いのIPVを推定しながら走行する対話シミュレーションの
//! エンジンを提供します。
//!
//! 各エージェントは相手の内部モデル（推定IPV）に対してIBRで計画を立て、
//! 計画の1ステップ目だけを実行します。相手の観測軌道が蓄積されると、
//! 過去に生成した仮説アンサンブルと照合して相手のIPV推定を更新します。
//!
//! ## シミュレーション処理順序
//!
//! 各ステップにおいて、以下の順序で処理が実行されます：
//!
//! 1. **仮説生成**: 両エージェントが相手の9仮説アンサンブルを生成
//! 2. **計画**: 両エージェントが相手の内部モデルとのIBRで計画を更新
//! 3. **前進**: 両エージェントが計画の2サンプル目へ前進し、IPV推定を更新
//!
//! 両者とも計画を終えてから前進するため、処理順による非対称は生じません。
//!
//! ## 使用例
//!
//! ```no_run
//! use ipvsim::scenario::ScenarioConfig;
//! use ipvsim::simulation::SimulationEngine;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ScenarioConfig::from_file("scenarios/left_turn.yaml")?;
//! let mut engine = SimulationEngine::new(config, 1)?;
//! engine.initialize()?;
//! let report = engine.run()?;
//! report.print_summary();
//! # Ok(())
//! # }
//! ```

use tracing::{debug, info, trace};

use crate::game::{GameEnvironment, GameError};
use crate::models::{agent::RealAgent, common::StateSample};
use crate::scenario::ScenarioConfig;

pub struct SimulationEngine {
    pub current_time: f64,
    pub dt: f64,
    pub max_steps: usize,
    pub step_count: usize,

    env: GameEnvironment,
    agents: [RealAgent; 2],

    pub scenario_config: ScenarioConfig,
    pub verbose_level: u8,
}

impl SimulationEngine {
    /// シナリオからエンジンを作成
    ///
    /// ゲームの実行環境と2台のエージェントを構築します。
    pub fn new(scenario: ScenarioConfig, verbose_level: u8) -> Result<Self, Box<dyn std::error::Error>> {
        let env = scenario.build_environment()?;
        let agents = scenario.build_agents()?;

        Ok(Self {
            current_time: 0.0,
            dt: scenario.sim.dt_s,
            max_steps: scenario.sim.steps,
            step_count: 0,
            env,
            agents,
            scenario_config: scenario,
            verbose_level,
        })
    }

    /// 走行目標の参照経路を解決できることを確認
    pub fn initialize(&mut self) -> Result<(), GameError> {
        if self.verbose_level > 0 {
            info!("シミュレーションエンジンを初期化中...");
        }

        for agent in &self.agents {
            agent.context(&self.env)?;
            agent.counterpart_model().context(&self.env)?;

            if self.verbose_level > 1 {
                let position = agent.state().position;
                debug!(
                    agent_id = %agent.id,
                    target = %agent.state().target,
                    x = position.x,
                    y = position.y,
                    ipv = agent.ipv(),
                    "AGENT_INITIALIZED: エージェントを初期化しました"
                );
            }
        }

        if self.verbose_level > 0 {
            info!("初期化完了:");
            info!("  エージェント: {}台", self.agents.len());
            info!("  計画軌道長: {}サンプル", self.env.config().track_len);
            info!("  IPV仮説数: {}", self.env.config().candidates.len());
        }

        Ok(())
    }

    pub fn env(&self) -> &GameEnvironment {
        &self.env
    }

    pub fn agents(&self) -> &[RealAgent; 2] {
        &self.agents
    }

    /// 全ステップを実行
    pub fn run(&mut self) -> Result<SimulationReport, GameError> {
        info!("=== シミュレーション実行開始 ===");

        let progress_interval = (self.max_steps / 10).max(1);

        while self.step_count < self.max_steps {
            self.step()?;

            if self.verbose_level > 2 {
                trace!("時刻: {:.1}秒 (ステップ: {})", self.current_time, self.step_count);
            }

            if self.step_count % progress_interval == 0 && self.verbose_level > 0 {
                let progress = self.step_count as f64 / self.max_steps as f64 * 100.0;
                info!(
                    "進行状況: {:.1}% ({}/{}ステップ, {:.1}秒)",
                    progress, self.step_count, self.max_steps, self.current_time
                );
            }
        }

        info!("=== シミュレーション完了 ===");
        info!("実行時間: {:.1}秒", self.current_time);
        info!("総ステップ数: {}", self.step_count);

        Ok(self.report())
    }

    /// 1ステップ分の処理
    pub fn step(&mut self) -> Result<(), GameError> {
        let env = &self.env;
        let [first, second] = &mut self.agents;

        // 2台分の仮説生成と計画は互いに独立
        let (a, b) = rayon::join(|| first.sample_hypotheses(env), || second.sample_hypotheses(env));
        a?;
        b?;

        let (a, b) = rayon::join(|| first.plan_step(env), || second.plan_step(env));
        a?;
        b?;

        let first_estimate = first.advance(second, env);
        let second_estimate = second.advance(first, env);

        for (agent, estimate) in [(&*first, first_estimate), (&*second, second_estimate)] {
            if let Some(estimate) = estimate {
                debug!(
                    agent_id = %agent.id,
                    step = self.step_count + 1,
                    ipv_estimate = estimate.ipv,
                    ipv_error = estimate.error,
                    "STEP_ESTIMATE: 相手IPVの推定値"
                );
            }
        }

        self.current_time += self.dt;
        self.step_count += 1;
        Ok(())
    }

    /// 現時点の実行結果
    pub fn report(&self) -> SimulationReport {
        let agents = self
            .agents
            .iter()
            .zip(self.agents.iter().rev())
            .map(|(agent, counterpart)| {
                let belief = &agent.counterpart_model().belief;
                let progress_m = self
                    .env
                    .reference_path(&agent.state().target)
                    .ok()
                    .zip(agent.observed().first())
                    .map(|(path, start)| path.progress(&agent.state().position) - path.progress(&start.position()))
                    .unwrap_or(0.0);

                AgentReport {
                    id: agent.id.clone(),
                    counterpart_id: counterpart.id.clone(),
                    true_ipv: agent.ipv(),
                    counterpart_true_ipv: counterpart.ipv(),
                    observed: agent.observed().to_vec(),
                    ipv_history: belief.ipv_history.clone(),
                    error_history: belief.error_history.clone(),
                    final_estimate: belief.ipv,
                    final_error: belief.last_error(),
                    progress_m,
                }
            })
            .collect();

        SimulationReport {
            steps: self.step_count,
            elapsed_s: self.current_time,
            agents,
        }
    }
}

/// エージェントごとの実行結果
#[derive(Debug, Clone, PartialEq)]
pub struct AgentReport {
    pub id: String,
    pub counterpart_id: String,
    pub true_ipv: f64,
    pub counterpart_true_ipv: f64,
    /// 実際に走行した軌道
    pub observed: Vec<StateSample>,
    /// 相手IPV推定値の履歴
    pub ipv_history: Vec<f64>,
    pub error_history: Vec<f64>,
    /// 最終的な相手IPV推定値
    pub final_estimate: f64,
    pub final_error: Option<f64>,
    /// 参照経路に沿った走行距離（m）
    pub progress_m: f64,
}

/// シミュレーション結果
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationReport {
    pub steps: usize,
    pub elapsed_s: f64,
    pub agents: Vec<AgentReport>,
}

impl SimulationReport {
    pub fn agent(&self, id: &str) -> Option<&AgentReport> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// 結果の概要を表示
    pub fn print_summary(&self) {
        println!("=== シミュレーション結果 ===");
        println!("ステップ数: {} ({:.1}秒)", self.steps, self.elapsed_s);
        println!();

        for agent in &self.agents {
            println!("--- {} ---", agent.id);
            if let Some(last) = agent.observed.last() {
                println!(
                    "最終位置: ({:.2}, {:.2}) / 速さ {:.2}m/s / 経路上の走行距離 {:.2}m",
                    last.x,
                    last.y,
                    last.speed(),
                    agent.progress_m
                );
            }
            println!(
                "{} のIPV推定: {:.3}rad (真値 {:.3}rad, 推定回数 {})",
                agent.counterpart_id,
                agent.final_estimate,
                agent.counterpart_true_ipv,
                agent.ipv_history.len()
            );
            match agent.final_error {
                Some(error) => println!("推定誤差: {:.3}", error),
                None => println!("推定誤差: -（観測不足）"),
            }
            println!();
        }
    }
}
