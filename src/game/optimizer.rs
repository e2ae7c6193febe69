//! # 有界最適化
//!
//! 箱型制約付きの非線形最小化を行う射影勾配法です。
//!
//! 1. 中心差分で勾配を求める（上下限に張り付いた変数は片側差分）
//! 2. Barzilai–Borwein 法でステップ幅を推定
//! 3. 射影した試行点で Armijo 条件を満たすまでステップ幅を半減
//! 4. 勾配で進めなくなったら座標方向の探索で改善点を探す
//!
//! 目的関数は離散化された参照経路への距離を含むため、折れ点で勾配が
//! 当てにならないことがあります。座標探索はその場合の抜け道です。
//!
//! 初期値から決定的に反復するため、同じ入力には常に同じ解を返します。
//! 収束しなかった場合もエラーにはせず、それまでの最良点を返します。

use crate::game::config::OptimizerConfig;
use crate::models::common::math_utils::{dot, inf_norm};

/// Armijo 条件の十分減少係数
const ARMIJO_C: f64 = 1e-4;
/// 1反復あたりのステップ幅半減の上限回数
const MAX_BACKTRACKS: usize = 40;
/// 座標探索の初期ステップ（変数範囲に対する比率）
const PATTERN_INITIAL_FRACTION: f64 = 0.25;
/// 座標探索を打ち切るステップ比率
const PATTERN_MIN_FRACTION: f64 = 1e-3;

/// 最適化の終了理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// 射影勾配が十分小さくなった
    GradientTolerance,
    /// 目的関数値の変化が十分小さくなった
    FunctionTolerance,
    /// 直線探索でも座標探索でも減少方向が見つからなかった
    LineSearchFailed,
    /// 反復回数の上限に達した
    IterationLimit,
}

/// 最適化結果
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizeResult {
    /// 最良点
    pub x: Vec<f64>,
    /// 最良点での目的関数値
    pub fun: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub termination: Termination,
}

impl OptimizeResult {
    pub fn converged(&self) -> bool {
        matches!(
            self.termination,
            Termination::GradientTolerance | Termination::FunctionTolerance
        )
    }
}

/// 箱型制約付き最小化器
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundedMinimizer {
    config: OptimizerConfig,
}

impl BoundedMinimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// `f` を `bounds` の範囲で最小化
    ///
    /// # 引数
    ///
    /// * `f` - 目的関数
    /// * `x0` - 初期値（範囲外の成分は射影されます）
    /// * `bounds` - 各変数の `(下限, 上限)`
    pub fn minimize<F>(&self, f: F, x0: &[f64], bounds: &[(f64, f64)]) -> OptimizeResult
    where
        F: Fn(&[f64]) -> f64,
    {
        let mut evaluations = 0;
        let mut eval = |x: &[f64]| {
            evaluations += 1;
            f(x)
        };

        let mut x = x0.to_vec();
        project(&mut x, bounds);
        let mut fx = eval(&x);
        let mut g = self.gradient(&mut eval, &x, fx, bounds);
        let mut alpha = initial_step(&g);

        let mut iterations = 0;
        let mut termination = Termination::IterationLimit;

        while iterations < self.config.max_iterations {
            iterations += 1;

            let stalled = if projected_gradient_norm(&x, &g, bounds) <= self.config.gtol {
                Termination::GradientTolerance
            } else if let Some((x_new, f_new, step)) = self.line_search(&mut eval, &x, fx, &g, alpha, bounds) {
                let g_new = self.gradient(&mut eval, &x_new, f_new, bounds);
                let s: Vec<f64> = x_new.iter().zip(&x).map(|(a, b)| a - b).collect();
                let y: Vec<f64> = g_new.iter().zip(&g).map(|(a, b)| a - b).collect();
                let sy = dot(&s, &y);
                alpha = if sy > 1e-12 {
                    (dot(&s, &s) / sy).clamp(1e-6, 1e6)
                } else {
                    (step * 2.0).min(1e6)
                };

                let f_change = (fx - f_new).abs();
                x = x_new;
                fx = f_new;
                g = g_new;

                if f_change <= self.config.ftol * (1.0 + fx.abs()) {
                    termination = Termination::FunctionTolerance;
                    break;
                }
                continue;
            } else {
                Termination::LineSearchFailed
            };

            // 勾配で進めない点でも座標方向に改善できれば続行
            let Some((x_new, f_new)) = self.pattern_step(&mut eval, &x, fx, bounds) else {
                termination = stalled;
                break;
            };
            x = x_new;
            fx = f_new;
            g = self.gradient(&mut eval, &x, fx, bounds);
            alpha = initial_step(&g);
        }

        OptimizeResult {
            x,
            fun: fx,
            iterations,
            evaluations,
            termination,
        }
    }

    /// 射影経路に沿った Armijo 直線探索
    ///
    /// # 戻り値
    ///
    /// 受理した `(試行点, 目的関数値, ステップ幅)`。見つからなければ `None`
    fn line_search<E>(
        &self,
        eval: &mut E,
        x: &[f64],
        fx: f64,
        g: &[f64],
        alpha: f64,
        bounds: &[(f64, f64)],
    ) -> Option<(Vec<f64>, f64, f64)>
    where
        E: FnMut(&[f64]) -> f64,
    {
        let mut step = alpha;
        for _ in 0..MAX_BACKTRACKS {
            let mut trial: Vec<f64> = x.iter().zip(g).map(|(xi, gi)| xi - step * gi).collect();
            project(&mut trial, bounds);
            let direction: Vec<f64> = trial.iter().zip(x).map(|(t, xi)| t - xi).collect();
            let decrease = dot(g, &direction);
            if decrease >= 0.0 {
                return None;
            }
            let f_trial = eval(&trial);
            if f_trial <= fx + ARMIJO_C * decrease {
                return Some((trial, f_trial, step));
            }
            step *= 0.5;
        }
        None
    }

    /// 座標方向の探索
    ///
    /// 有界な各変数を範囲幅の一定比率だけ正負に動かし、改善した移動を順に
    /// 採用します。1周で改善がなければ比率を半減し、下限比率まで続けます。
    /// 範囲が有限でない変数は動かしません。
    fn pattern_step<E>(
        &self,
        eval: &mut E,
        x: &[f64],
        fx: f64,
        bounds: &[(f64, f64)],
    ) -> Option<(Vec<f64>, f64)>
    where
        E: FnMut(&[f64]) -> f64,
    {
        let mut fraction = PATTERN_INITIAL_FRACTION;
        while fraction >= PATTERN_MIN_FRACTION {
            let mut best = x.to_vec();
            let mut f_best = fx;
            let mut improved = false;

            for (i, &(lo, hi)) in bounds.iter().enumerate().take(x.len()) {
                let width = hi - lo;
                if !(width.is_finite() && width > 0.0) {
                    continue;
                }
                let step = fraction * width;
                for delta in [step, -step] {
                    let mut trial = best.clone();
                    trial[i] = (best[i] + delta).clamp(lo, hi);
                    if trial[i] == best[i] {
                        continue;
                    }
                    let f_trial = eval(&trial);
                    if f_trial < f_best - self.config.ftol * (1.0 + f_best.abs()) {
                        best = trial;
                        f_best = f_trial;
                        improved = true;
                        break;
                    }
                }
            }

            if improved {
                return Some((best, f_best));
            }
            fraction *= 0.5;
        }
        None
    }

    /// 差分勾配
    ///
    /// 範囲内では中心差分、上下限に近い変数は範囲内に収まる側の片側差分です。
    fn gradient<E>(&self, eval: &mut E, x: &[f64], fx: f64, bounds: &[(f64, f64)]) -> Vec<f64>
    where
        E: FnMut(&[f64]) -> f64,
    {
        let mut shifted = x.to_vec();
        (0..x.len())
            .map(|i| {
                let h = self.config.fd_step * x[i].abs().max(1.0);
                let (lower, upper) = bounds
                    .get(i)
                    .copied()
                    .unwrap_or((f64::NEG_INFINITY, f64::INFINITY));
                let forward = x[i] + h <= upper;
                let backward = x[i] - h >= lower;

                let mut eval_at = |value: f64| {
                    shifted[i] = value;
                    let f_shifted = eval(&shifted);
                    shifted[i] = x[i];
                    f_shifted
                };
                match (forward, backward) {
                    (true, true) => (eval_at(x[i] + h) - eval_at(x[i] - h)) / (2.0 * h),
                    (true, false) => (eval_at(x[i] + h) - fx) / h,
                    (false, true) => (fx - eval_at(x[i] - h)) / h,
                    (false, false) => 0.0,
                }
            })
            .collect()
    }
}

/// 勾配の大きさに応じた初回ステップ幅
fn initial_step(g: &[f64]) -> f64 {
    1.0 / inf_norm(g).max(1.0)
}

/// 各成分を上下限へ射影
fn project(x: &mut [f64], bounds: &[(f64, f64)]) {
    for (xi, &(lo, hi)) in x.iter_mut().zip(bounds) {
        *xi = xi.clamp(lo, hi);
    }
}

/// 射影勾配 `P(x − g) − x` の無限大ノルム
fn projected_gradient_norm(x: &[f64], g: &[f64], bounds: &[(f64, f64)]) -> f64 {
    let mut moved: Vec<f64> = x.iter().zip(g).map(|(xi, gi)| xi - gi).collect();
    project(&mut moved, bounds);
    let pg: Vec<f64> = moved.iter().zip(x).map(|(m, xi)| m - xi).collect();
    inf_norm(&pg)
}
