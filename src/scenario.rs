use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::game::{
    config::{BeliefConfig, CostWeights, GameConfig, IbrPolicy, IpvCandidates, OptimizerConfig},
    GameEnvironment, GameError,
};
use crate::models::{
    agent::{AgentState, BeliefModel, RealAgent},
    common::{ControlBounds, Position2D, Velocity2D},
    kinematics::BicycleModel,
    reference::{PathLibrary, ReferencePath, DEFAULT_PATH_RESOLUTION, GO_STRAIGHT, LEFT_TURN},
};

/// シナリオメタデータ
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioMeta {
    pub version: String,
    pub name: String,
    pub description: String,
}

/// シミュレーション設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    pub dt_s: f64,
    /// 実行ステップ数
    pub steps: usize,
    /// 計画軌道のサンプル数
    pub track_len: usize,
}

/// コスト重み設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WeightsConfig {
    pub delay: f64,
    pub deviation: f64,
    pub plan_change: f64,
    pub interior: f64,
    pub group: f64,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        let w = CostWeights::default();
        Self {
            delay: w.delay,
            deviation: w.deviation,
            plan_change: w.plan_change,
            interior: w.interior,
            group: w.group,
        }
    }
}

/// 制御入力の上下限設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BoundsConfig {
    pub max_accel_mps2: f64,
    pub max_steering_deg: f64,
}

impl Default for BoundsConfig {
    fn default() -> Self {
        Self {
            max_accel_mps2: 3.0,
            max_steering_deg: 30.0,
        }
    }
}

/// IBR設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IbrConfig {
    pub tolerance_m: f64,
    pub max_iterations: usize,
}

impl Default for IbrConfig {
    fn default() -> Self {
        let p = IbrPolicy::default();
        Self {
            tolerance_m: p.tolerance,
            max_iterations: p.max_iterations,
        }
    }
}

/// 信念推定設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BeliefSection {
    pub sigma_rad: f64,
    pub window_steps: usize,
    pub epsilon: f64,
}

impl Default for BeliefSection {
    fn default() -> Self {
        let b = BeliefConfig::default();
        Self {
            sigma_rad: b.sigma,
            window_steps: b.window_steps,
            epsilon: b.epsilon,
        }
    }
}

/// 最適化設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OptimizerSection {
    pub max_iterations: usize,
    pub ftol: f64,
    pub gtol: f64,
}

impl Default for OptimizerSection {
    fn default() -> Self {
        let o = OptimizerConfig::default();
        Self {
            max_iterations: o.max_iterations,
            ftol: o.ftol,
            gtol: o.gtol,
        }
    }
}

/// ゲームソルバー設定（省略時は既定値）
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GameSection {
    pub weights: WeightsConfig,
    pub bounds: BoundsConfig,
    pub ibr: IbrConfig,
    pub belief: BeliefSection,
    pub optimizer: OptimizerSection,
}

/// 車両設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VehicleConfig {
    pub wheelbase_m: f64,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            wheelbase_m: BicycleModel::default().wheelbase,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PointConfig {
    pub x_m: f64,
    pub y_m: f64,
}

impl From<&PointConfig> for Position2D {
    fn from(p: &PointConfig) -> Self {
        Position2D::new(p.x_m, p.y_m)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VelocityConfig {
    pub x_mps: f64,
    pub y_mps: f64,
}

/// エージェント設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    pub id: String,
    /// 走行目標ラベル
    pub target: String,
    pub position: PointConfig,
    pub velocity: VelocityConfig,
    pub heading_deg: f64,
    /// 真のIPV
    pub ipv_deg: f64,
    /// 相手のIPVの初期推定値
    #[serde(default)]
    pub initial_ipv_guess_deg: f64,
}

impl AgentConfig {
    pub fn to_state(&self) -> AgentState {
        AgentState::new(
            Position2D::from(&self.position),
            Velocity2D::new(self.velocity.x_mps, self.velocity.y_mps),
            self.heading_deg.to_radians(),
            self.target.clone(),
        )
    }
}

/// 参照経路設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReferencePathConfig {
    pub label: String,
    #[serde(default = "default_resolution")]
    pub resolution_m: f64,
    pub waypoints: Vec<PointConfig>,
}

fn default_resolution() -> f64 {
    DEFAULT_PATH_RESOLUTION
}

/// 完全なシナリオ設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioConfig {
    pub meta: ScenarioMeta,
    pub sim: SimulationConfig,
    #[serde(default)]
    pub game: GameSection,
    #[serde(default)]
    pub vehicle: VehicleConfig,
    pub agents: Vec<AgentConfig>,
    #[serde(default)]
    pub reference_paths: Vec<ReferencePathConfig>,
}

impl ScenarioConfig {
    /// YAMLファイルからシナリオ設定を読み込み
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.to_path_buf()));
        }

        let contents = fs::read_to_string(path).map_err(|e| ScenarioError::IoError(path.to_path_buf(), e))?;

        let config: ScenarioConfig =
            serde_yaml::from_str(&contents).map_err(|e| ScenarioError::ParseError(path.to_path_buf(), e))?;

        config.validate()?;

        Ok(config)
    }

    /// 文字列からシナリオ設定を読み込み（検証込み）
    pub fn from_yaml_str(contents: &str) -> Result<Self, ScenarioError> {
        let config: ScenarioConfig = serde_yaml::from_str(contents)
            .map_err(|e| ScenarioError::ParseError(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        Ok(config)
    }

    /// 設定の基本的な検証
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.sim.dt_s <= 0.0 {
            return Err(ScenarioError::ValidationError("dt_s must be positive".to_string()));
        }
        if self.sim.steps == 0 {
            return Err(ScenarioError::ValidationError("steps must be positive".to_string()));
        }
        if self.vehicle.wheelbase_m <= 0.0 {
            return Err(ScenarioError::ValidationError("wheelbase_m must be positive".to_string()));
        }

        if self.agents.len() != 2 {
            return Err(ScenarioError::ValidationError(format!(
                "exactly 2 agents are required, got {}",
                self.agents.len()
            )));
        }
        if self.agents[0].id == self.agents[1].id {
            return Err(ScenarioError::ValidationError(format!(
                "duplicate agent id {}",
                self.agents[0].id
            )));
        }

        for path in &self.reference_paths {
            if path.waypoints.len() < 2 {
                return Err(ScenarioError::ValidationError(format!(
                    "reference path {} needs at least 2 waypoints",
                    path.label
                )));
            }
            if path.resolution_m <= 0.0 {
                return Err(ScenarioError::ValidationError(format!(
                    "reference path {} resolution must be positive",
                    path.label
                )));
            }
        }

        for agent in &self.agents {
            if !self.has_path(&agent.target) {
                return Err(ScenarioError::ValidationError(format!(
                    "agent {} has unknown target {}",
                    agent.id, agent.target
                )));
            }
            if agent.ipv_deg.abs() > 90.0 {
                return Err(ScenarioError::ValidationError(format!(
                    "agent {} ipv_deg must be within [-90, 90]",
                    agent.id
                )));
            }
        }

        GameConfig::from_scenario(self)
            .validate()
            .map_err(|e| ScenarioError::ValidationError(e.to_string()))
    }

    /// 走行目標ラベルが標準経路またはシナリオ定義の経路に存在するか
    fn has_path(&self, label: &str) -> bool {
        label == LEFT_TURN || label == GO_STRAIGHT || self.reference_paths.iter().any(|p| p.label == label)
    }

    /// 標準経路にシナリオ定義の経路を追加（同名は上書き）した経路ライブラリ
    pub fn path_library(&self) -> PathLibrary {
        let mut library = PathLibrary::intersection(DEFAULT_PATH_RESOLUTION);
        for path in &self.reference_paths {
            let waypoints: Vec<Position2D> = path.waypoints.iter().map(Position2D::from).collect();
            library.insert(path.label.clone(), ReferencePath::from_waypoints(&waypoints, path.resolution_m));
        }
        library
    }

    /// ゲームの実行環境を構築
    pub fn build_environment(&self) -> Result<GameEnvironment, GameError> {
        GameEnvironment::new(
            GameConfig::from_scenario(self),
            Box::new(BicycleModel::new(self.vehicle.wheelbase_m)),
            Box::new(self.path_library()),
        )
    }

    /// 2台のエージェントを作成（互いを相手の内部モデルとして保持）
    pub fn build_agents(&self) -> Result<[RealAgent; 2], ScenarioError> {
        let [first, second] = self.agents.as_slice() else {
            return Err(ScenarioError::ValidationError("exactly 2 agents are required".to_string()));
        };
        let make = |own: &AgentConfig, other: &AgentConfig| {
            RealAgent::new(
                own.id.clone(),
                own.to_state(),
                own.ipv_deg.to_radians(),
                BeliefModel::new(other.to_state(), own.initial_ipv_guess_deg.to_radians()),
            )
        };
        Ok([make(first, second), make(second, first)])
    }

    /// シナリオの概要を表示
    pub fn print_summary(&self) {
        println!("=== シナリオ情報 ===");
        println!("名前: {}", self.meta.name);
        println!("説明: {}", self.meta.description);
        println!("バージョン: {}", self.meta.version);
        println!();

        println!("=== シミュレーション設定 ===");
        println!("時間刻み: {:.3}秒", self.sim.dt_s);
        println!(
            "ステップ数: {} ({:.1}秒)",
            self.sim.steps,
            self.sim.steps as f64 * self.sim.dt_s
        );
        println!("計画軌道長: {}サンプル", self.sim.track_len);
        println!();

        println!("=== ゲーム設定 ===");
        let w = &self.game.weights;
        println!(
            "重み: 遅れ {} / 逸脱 {} / 計画変更 {} / 内部 {} / 集団 {}",
            w.delay, w.deviation, w.plan_change, w.interior, w.group
        );
        println!(
            "入力上限: 加速度 {:.1}m/s² / 操舵角 {:.1}度",
            self.game.bounds.max_accel_mps2, self.game.bounds.max_steering_deg
        );
        println!(
            "IBR: 許容誤差 {:e}m / 反復上限 {}回",
            self.game.ibr.tolerance_m, self.game.ibr.max_iterations
        );
        println!(
            "信念推定: σ {:.4}rad / 観測窓 {}ステップ",
            self.game.belief.sigma_rad, self.game.belief.window_steps
        );
        println!();

        println!("=== エージェント ===");
        for agent in &self.agents {
            println!(
                "  {}: 目標 {} / 位置 ({:.1}, {:.1}) / 方位 {:.1}度 / IPV {:.1}度 (相手の初期推定 {:.1}度)",
                agent.id,
                agent.target,
                agent.position.x_m,
                agent.position.y_m,
                agent.heading_deg,
                agent.ipv_deg,
                agent.initial_ipv_guess_deg
            );
        }

        if !self.reference_paths.is_empty() {
            println!();
            println!("=== 追加参照経路 ===");
            for path in &self.reference_paths {
                println!("  {}: {}点 (解像度 {}m)", path.label, path.waypoints.len(), path.resolution_m);
            }
        }
    }
}

impl GameConfig {
    /// シナリオ設定から実行時の不変設定を作成
    pub fn from_scenario(scenario: &ScenarioConfig) -> Self {
        let game = &scenario.game;
        Self {
            dt: scenario.sim.dt_s,
            track_len: scenario.sim.track_len,
            weights: CostWeights {
                delay: game.weights.delay,
                deviation: game.weights.deviation,
                plan_change: game.weights.plan_change,
                interior: game.weights.interior,
                group: game.weights.group,
            },
            bounds: ControlBounds {
                max_acceleration: game.bounds.max_accel_mps2,
                max_steering: game.bounds.max_steering_deg.to_radians(),
            },
            ibr: IbrPolicy {
                tolerance: game.ibr.tolerance_m,
                max_iterations: game.ibr.max_iterations,
            },
            optimizer: OptimizerConfig {
                max_iterations: game.optimizer.max_iterations,
                ftol: game.optimizer.ftol,
                gtol: game.optimizer.gtol,
                ..OptimizerConfig::default()
            },
            belief: BeliefConfig {
                sigma: game.belief.sigma_rad,
                window_steps: game.belief.window_steps,
                epsilon: game.belief.epsilon,
            },
            candidates: IpvCandidates::default(),
        }
    }
}

/// シナリオ読み込みエラー
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("シナリオファイルが見つかりません: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("ファイル読み込みエラー {}: {}", .0.display(), .1)]
    IoError(PathBuf, #[source] std::io::Error),
    #[error("YAML解析エラー {}: {}", .0.display(), .1)]
    ParseError(PathBuf, #[source] serde_yaml::Error),
    #[error("設定検証エラー: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    const MINIMAL: &str = r#"
meta:
  version: "1.0"
  name: "test"
  description: "minimal"
sim:
  dt_s: 0.1
  steps: 5
  track_len: 10
agents:
  - id: "lt"
    target: "lt"
    position: { x_m: 13.0, y_m: -7.0 }
    velocity: { x_mps: 0.0, y_mps: 2.0 }
    heading_deg: 60.0
    ipv_deg: 60.0
  - id: "gs"
    target: "gs"
    position: { x_m: 20.0, y_m: -2.0 }
    velocity: { x_mps: -2.0, y_mps: 0.0 }
    heading_deg: 180.0
    ipv_deg: 0.0
"#;

    #[test]
    fn test_minimal_scenario_uses_default_game_settings() {
        let scenario = ScenarioConfig::from_yaml_str(MINIMAL).expect("valid scenario");
        let config = GameConfig::from_scenario(&scenario);
        assert_eq!(config.weights, CostWeights::default());
        assert_eq!(config.ibr, IbrPolicy::default());
        assert_eq!(config.belief.window_steps, 6);
        assert_abs_diff_eq!(config.bounds.max_steering, PI / 6.0, epsilon = 1e-12);
        assert_abs_diff_eq!(config.belief.sigma, PI / 40.0, epsilon = 1e-12);
    }

    #[test]
    fn test_build_agents_cross_links_counterpart_models() {
        let scenario = ScenarioConfig::from_yaml_str(MINIMAL).expect("valid scenario");
        let [lt, gs] = scenario.build_agents().expect("two agents");
        assert_eq!(lt.id, "lt");
        assert_abs_diff_eq!(lt.ipv(), PI / 3.0, epsilon = 1e-12);
        assert_eq!(lt.counterpart_model().state.target, "gs");
        assert_eq!(gs.counterpart_model().state.position, Position2D::new(13.0, -7.0));
        assert_eq!(lt.counterpart_model().ipv(), 0.0);
    }

    #[test]
    fn test_initial_ipv_guess_seeds_counterpart_belief() {
        let yaml = MINIMAL.replacen("ipv_deg: 60.0", "ipv_deg: 60.0\n    initial_ipv_guess_deg: -20.0", 1);
        let scenario = ScenarioConfig::from_yaml_str(&yaml).expect("valid scenario");
        let [lt, gs] = scenario.build_agents().expect("two agents");
        // 左折車が持つ直進車モデルの初期IPVだけが変わる
        assert_abs_diff_eq!(lt.counterpart_model().ipv(), -PI / 9.0, epsilon = 1e-12);
        assert_eq!(gs.counterpart_model().ipv(), 0.0);
    }

    #[test]
    fn test_unknown_target_is_rejected() {
        let yaml = MINIMAL.replace("target: \"gs\"", "target: \"uturn\"");
        let err = ScenarioConfig::from_yaml_str(&yaml).expect_err("unknown target");
        assert!(matches!(err, ScenarioError::ValidationError(_)));
    }

    #[test]
    fn test_custom_reference_path_is_registered() {
        let yaml = format!(
            "{}reference_paths:\n  - label: \"rt\"\n    waypoints:\n      - {{ x_m: 0.0, y_m: 0.0 }}\n      - {{ x_m: 5.0, y_m: 0.0 }}\n",
            MINIMAL.replace("target: \"gs\"", "target: \"rt\"")
        );
        let scenario = ScenarioConfig::from_yaml_str(&yaml).expect("valid scenario");
        let env = scenario.build_environment().expect("environment");
        assert!(env.reference_path("rt").is_ok());
        assert!(env.reference_path(LEFT_TURN).is_ok());
    }

    #[test]
    fn test_bundled_scenarios_load() {
        for name in ["left_turn.yaml", "parallel_lanes.yaml"] {
            let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios").join(name);
            let scenario = ScenarioConfig::from_file(&path).expect("bundled scenario");
            assert!(scenario.build_environment().is_ok(), "{name}");
        }
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = ScenarioConfig::from_file("no/such/scenario.yaml").expect_err("missing");
        assert!(matches!(err, ScenarioError::FileNotFound(_)));
    }
}
