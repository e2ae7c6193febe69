//! # ゲーム設定
//!
//! コストの重み、制御入力の上下限、IBR の反復方針、信念推定のパラメータを
//! 1つの不変な設定構造体にまとめます。各コンポーネントは構築時にこの設定を
//! 参照として受け取り、実行中に書き換えることはありません。

use std::f64::consts::PI;

use crate::game::GameError;
use crate::models::common::ControlBounds;

/// IPV候補の個数（−4π/9 〜 4π/9 の9点）
pub const IPV_CANDIDATE_COUNT: usize = 9;

/// コストモデルの重み
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostWeights {
    /// 走行遅れ（進捗不足）の重み
    pub delay: f64,
    /// 参照経路からの逸脱の重み
    pub deviation: f64,
    /// 計画変更の重み（現状は計画変更コスト自体が0）
    pub plan_change: f64,
    /// 内部コスト全体の重み
    pub interior: f64,
    /// 集団コスト全体の重み
    pub group: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            delay: 2.0,
            deviation: 0.4,
            plan_change: 0.2,
            interior: 5.0,
            group: 1.5,
        }
    }
}

/// IBR の反復方針
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IbrPolicy {
    /// 収束判定の位置変化量しきい値（m）
    pub tolerance: f64,
    /// 反復回数の上限。反復回数がこの値を超えた時点で打ち切ります。
    pub max_iterations: usize,
}

impl Default for IbrPolicy {
    fn default() -> Self {
        Self {
            tolerance: 1e-3,
            max_iterations: 10,
        }
    }
}

/// 有界最適化の設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerConfig {
    /// 反復回数の上限
    pub max_iterations: usize,
    /// 目的関数値の相対変化による収束しきい値
    pub ftol: f64,
    /// 射影勾配の無限大ノルムによる収束しきい値
    pub gtol: f64,
    /// 差分勾配の刻み幅
    pub fd_step: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            ftol: 1e-9,
            gtol: 1e-6,
            fd_step: 1.49e-8,
        }
    }
}

/// 信念推定の設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeliefConfig {
    /// 尤度関数のガウス分布の標準偏差
    pub sigma: f64,
    /// オンライン推定で参照する過去ステップ数の上限
    pub window_steps: usize,
    /// 重み正規化の分母に加える微小値
    pub epsilon: f64,
}

impl Default for BeliefConfig {
    fn default() -> Self {
        Self {
            sigma: PI / 40.0,
            window_steps: 6,
            epsilon: 1e-6,
        }
    }
}

/// IPV仮説の離散集合
///
/// −4π/9 〜 4π/9 を π/9 刻みで対称に離散化した固定の9点です。
#[derive(Debug, Clone, PartialEq)]
pub struct IpvCandidates {
    values: [f64; IPV_CANDIDATE_COUNT],
}

impl Default for IpvCandidates {
    fn default() -> Self {
        let mut values = [0.0; IPV_CANDIDATE_COUNT];
        for (slot, k) in values.iter_mut().zip(-4_i32..=4) {
            *slot = f64::from(k) * PI / 9.0;
        }
        Self { values }
    }
}

impl IpvCandidates {
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// ゲームソルバー全体の不変設定
#[derive(Debug, Clone, PartialEq)]
pub struct GameConfig {
    /// 時間刻み（秒）
    pub dt: f64,
    /// 計画軌道のサンプル数（TRACK_LEN）
    pub track_len: usize,
    pub weights: CostWeights,
    pub bounds: ControlBounds,
    pub ibr: IbrPolicy,
    pub optimizer: OptimizerConfig,
    pub belief: BeliefConfig,
    pub candidates: IpvCandidates,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            dt: 0.1,
            track_len: 10,
            weights: CostWeights::default(),
            bounds: ControlBounds {
                max_acceleration: 3.0,
                max_steering: PI / 6.0,
            },
            ibr: IbrPolicy::default(),
            optimizer: OptimizerConfig::default(),
            belief: BeliefConfig::default(),
            candidates: IpvCandidates::default(),
        }
    }
}

impl GameConfig {
    /// 設定値の検証
    pub fn validate(&self) -> Result<(), GameError> {
        if self.dt <= 0.0 {
            return Err(GameError::InvalidConfig("dt must be positive".to_string()));
        }
        if self.track_len < 2 {
            return Err(GameError::InvalidConfig("track_len must be at least 2".to_string()));
        }
        if self.bounds.max_acceleration < 0.0 || self.bounds.max_steering < 0.0 {
            return Err(GameError::InvalidConfig("control bounds must be non-negative".to_string()));
        }
        if self.ibr.tolerance <= 0.0 {
            return Err(GameError::InvalidConfig("ibr tolerance must be positive".to_string()));
        }
        if self.belief.sigma <= 0.0 {
            return Err(GameError::InvalidConfig("belief sigma must be positive".to_string()));
        }
        if self.belief.window_steps == 0 || self.belief.window_steps > self.track_len {
            return Err(GameError::InvalidConfig(format!(
                "belief window {} must be within 1..={}",
                self.belief.window_steps, self.track_len
            )));
        }
        Ok(())
    }
}
