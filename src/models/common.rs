use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};

/// 2次元位置を表す構造体
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position2D {
    pub x: f64, // m
    pub y: f64, // m
}

impl Position2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// 2点間のユークリッド距離
    pub fn distance(&self, other: &Position2D) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// 原点からの距離
    pub fn magnitude(&self) -> f64 {
        (self.x.powi(2) + self.y.powi(2)).sqrt()
    }
}

impl Add for Position2D {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        Self::new(self.x + other.x, self.y + other.y)
    }
}

impl Sub for Position2D {
    type Output = Self;

    fn sub(self, other: Self) -> Self::Output {
        Self::new(self.x - other.x, self.y - other.y)
    }
}

impl Mul<f64> for Position2D {
    type Output = Self;

    fn mul(self, scalar: f64) -> Self::Output {
        Self::new(self.x * scalar, self.y * scalar)
    }
}

/// 2次元速度を表す構造体
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Velocity2D {
    pub x: f64, // m/s
    pub y: f64, // m/s
}

impl Velocity2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// 速度ベクトルの大きさ
    pub fn magnitude(&self) -> f64 {
        (self.x.powi(2) + self.y.powi(2)).sqrt()
    }

    /// 方位角と速さから速度ベクトルを作成
    pub fn from_heading(speed: f64, heading: f64) -> Self {
        Self::new(speed * heading.cos(), speed * heading.sin())
    }
}

/// 軌道上の1サンプル `(x, y, vx, vy, heading)`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StateSample {
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    /// 方位角（rad）
    pub heading: f64,
}

impl StateSample {
    pub fn new(position: Position2D, velocity: Velocity2D, heading: f64) -> Self {
        Self {
            x: position.x,
            y: position.y,
            vx: velocity.x,
            vy: velocity.y,
            heading,
        }
    }

    pub fn position(&self) -> Position2D {
        Position2D::new(self.x, self.y)
    }

    pub fn velocity(&self) -> Velocity2D {
        Velocity2D::new(self.vx, self.vy)
    }

    pub fn speed(&self) -> f64 {
        self.velocity().magnitude()
    }
}

/// 離散時間軌道
///
/// 運動モデルが初期状態と制御入力列から生成する固定長のサンプル列です。
/// 生成後は変更されず、再計画のたびに新しい値が作られます。
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    samples: Vec<StateSample>,
}

impl Trajectory {
    pub fn new(samples: Vec<StateSample>) -> Self {
        Self { samples }
    }

    /// 同じ状態を `len` 回繰り返した停止軌道（IBRの初期推定に使用）
    pub fn stationary(sample: StateSample, len: usize) -> Self {
        Self::new(vec![sample; len])
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[StateSample] {
        &self.samples
    }

    pub fn sample(&self, index: usize) -> Option<&StateSample> {
        self.samples.get(index)
    }

    pub fn first(&self) -> Option<&StateSample> {
        self.samples.first()
    }

    pub fn last(&self) -> Option<&StateSample> {
        self.samples.last()
    }

    /// 位置列のみを取り出す
    pub fn positions(&self) -> Vec<Position2D> {
        self.samples.iter().map(StateSample::position).collect()
    }

    /// 先頭 `len` サンプルの位置列
    pub fn leading_positions(&self, len: usize) -> Vec<Position2D> {
        self.samples.iter().take(len).map(StateSample::position).collect()
    }

    /// 2軌道間の位置変化量（位置列のフロベニウスノルム）
    ///
    /// 共通する長さの範囲のみを比較します。
    pub fn position_change_norm(&self, other: &Trajectory) -> f64 {
        self.samples
            .iter()
            .zip(other.samples.iter())
            .map(|(a, b)| (a.x - b.x).powi(2) + (a.y - b.y).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

/// 1ステップ分の制御入力
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControlInput {
    /// 加速度（m/s²）
    pub acceleration: f64,
    /// 操舵角（rad）
    pub steering: f64,
}

/// 制御入力の上下限
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlBounds {
    pub max_acceleration: f64,
    pub max_steering: f64,
}

impl ControlBounds {
    /// 平坦化した最適化変数用の箱型制約（加速度列→操舵角列の順）
    pub fn flat_bounds(&self, steps: usize) -> Vec<(f64, f64)> {
        let accel = (-self.max_acceleration, self.max_acceleration);
        let steer = (-self.max_steering, self.max_steering);
        std::iter::repeat_n(accel, steps)
            .chain(std::iter::repeat_n(steer, steps))
            .collect()
    }

    pub fn contains(&self, input: &ControlInput) -> bool {
        input.acceleration.abs() <= self.max_acceleration && input.steering.abs() <= self.max_steering
    }
}

/// 制御入力列（長さは軌道長 − 1）
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ControlSequence {
    inputs: Vec<ControlInput>,
}

impl ControlSequence {
    pub fn new(inputs: Vec<ControlInput>) -> Self {
        Self { inputs }
    }

    pub fn zeros(steps: usize) -> Self {
        Self::new(vec![ControlInput::default(); steps])
    }

    /// 平坦化ベクトル（前半が加速度、後半が操舵角）から復元
    ///
    /// 奇数長の場合、末尾の余りは無視されます。
    pub fn from_flat(flat: &[f64]) -> Self {
        let steps = flat.len() / 2;
        let inputs = (0..steps)
            .map(|i| ControlInput {
                acceleration: flat[i],
                steering: flat[steps + i],
            })
            .collect();
        Self::new(inputs)
    }

    pub fn to_flat(&self) -> Vec<f64> {
        self.inputs
            .iter()
            .map(|u| u.acceleration)
            .chain(self.inputs.iter().map(|u| u.steering))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn inputs(&self) -> &[ControlInput] {
        &self.inputs
    }

    pub fn get(&self, index: usize) -> Option<&ControlInput> {
        self.inputs.get(index)
    }

    /// 上下限でクリップした新しい入力列
    pub fn clamped(&self, bounds: &ControlBounds) -> Self {
        let inputs = self
            .inputs
            .iter()
            .map(|u| ControlInput {
                acceleration: u.acceleration.clamp(-bounds.max_acceleration, bounds.max_acceleration),
                steering: u.steering.clamp(-bounds.max_steering, bounds.max_steering),
            })
            .collect();
        Self::new(inputs)
    }

    pub fn is_within(&self, bounds: &ControlBounds) -> bool {
        self.inputs.iter().all(|u| bounds.contains(u))
    }
}

/// 数学ユーティリティ関数
pub mod math_utils {
    use std::f64::consts::PI;

    /// 角度を(-π, π]の範囲に正規化
    pub fn normalize_angle(angle_rad: f64) -> f64 {
        let mut normalized = angle_rad % (2.0 * PI);
        if normalized > PI {
            normalized -= 2.0 * PI;
        } else if normalized <= -PI {
            normalized += 2.0 * PI;
        }
        normalized
    }

    /// 2つのベクトルの内積
    pub fn dot(a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    /// 無限大ノルム
    pub fn inf_norm(v: &[f64]) -> f64 {
        v.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()))
    }
}
