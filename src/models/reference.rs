use std::collections::BTreeMap;
use std::f64::consts::PI;

use crate::models::{common::Position2D, traits::ReferencePathProvider};

/// 参照経路の既定の離散化間隔（m）
pub const DEFAULT_PATH_RESOLUTION: f64 = 0.1;

/// 左折（"lt"）経路のラベル
pub const LEFT_TURN: &str = "lt";
/// 直進（"gs"）経路のラベル
pub const GO_STRAIGHT: &str = "gs";

/// 参照経路
///
/// 走行目標ごとの中心線を一定間隔で離散化した点列と、
/// 各点までの累積弧長を保持します。
#[derive(Debug, Clone, PartialEq)]
pub struct ReferencePath {
    points: Vec<Position2D>,
    arc_length: Vec<f64>,
}

impl ReferencePath {
    /// 離散化済みの点列から作成
    pub fn from_points(points: Vec<Position2D>) -> Self {
        let mut arc_length = Vec::with_capacity(points.len());
        let mut total = 0.0;
        for (i, point) in points.iter().enumerate() {
            if i > 0 {
                total += point.distance(&points[i - 1]);
            }
            arc_length.push(total);
        }
        Self { points, arc_length }
    }

    /// 折れ線の頂点列を `resolution` 間隔で補間して作成
    pub fn from_waypoints(waypoints: &[Position2D], resolution: f64) -> Self {
        let mut builder = PathBuilder::new(resolution);
        if let Some(first) = waypoints.first() {
            builder = builder.start(*first);
        }
        for waypoint in waypoints.iter().skip(1) {
            builder = builder.line_to(*waypoint);
        }
        builder.build()
    }

    pub fn points(&self) -> &[Position2D] {
        &self.points
    }

    pub fn arc_length(&self) -> &[f64] {
        &self.arc_length
    }

    pub fn total_length(&self) -> f64 {
        self.arc_length.last().copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// 最近傍の経路点（インデックス、距離）
    ///
    /// 同距離の点が複数ある場合は最初の点を返します。
    pub fn nearest(&self, point: &Position2D) -> Option<(usize, f64)> {
        self.points
            .iter()
            .map(|p| p.distance(point))
            .enumerate()
            .fold(None, |best, (i, d)| match best {
                Some((_, best_d)) if best_d <= d => best,
                _ => Some((i, d)),
            })
    }

    /// 経路からの逸脱量（最近傍点までの距離）
    pub fn deviation(&self, point: &Position2D) -> f64 {
        self.nearest(point).map(|(_, d)| d).unwrap_or(0.0)
    }

    /// 最近傍点の累積弧長（経路に沿った進捗）
    pub fn progress(&self, point: &Position2D) -> f64 {
        self.nearest(point)
            .map(|(i, _)| self.arc_length[i])
            .unwrap_or(0.0)
    }
}

/// 直線と円弧をつなげて参照経路を構築するビルダー
#[derive(Debug, Clone)]
pub struct PathBuilder {
    resolution: f64,
    points: Vec<Position2D>,
}

impl PathBuilder {
    pub fn new(resolution: f64) -> Self {
        Self {
            resolution: resolution.max(1e-3),
            points: Vec::new(),
        }
    }

    pub fn start(mut self, point: Position2D) -> Self {
        self.points.clear();
        self.points.push(point);
        self
    }

    /// 現在の終点から `end` まで直線を追加
    pub fn line_to(mut self, end: Position2D) -> Self {
        let Some(&start) = self.points.last() else {
            self.points.push(end);
            return self;
        };
        let length = start.distance(&end);
        let segments = (length / self.resolution).ceil().max(1.0) as usize;
        for k in 1..=segments {
            let ratio = k as f64 / segments as f64;
            self.points.push(start + (end - start) * ratio);
        }
        self
    }

    /// 中心 `center`、半径 `radius` の円弧を `start_angle` から `end_angle` まで追加（rad）
    pub fn arc(mut self, center: Position2D, radius: f64, start_angle: f64, end_angle: f64) -> Self {
        let sweep = end_angle - start_angle;
        let length = (sweep * radius).abs();
        let segments = (length / self.resolution).ceil().max(1.0) as usize;
        let first = if self.points.is_empty() { 0 } else { 1 };
        for k in first..=segments {
            let angle = start_angle + sweep * k as f64 / segments as f64;
            self.points.push(Position2D::new(
                center.x + radius * angle.cos(),
                center.y + radius * angle.sin(),
            ));
        }
        self
    }

    pub fn build(self) -> ReferencePath {
        ReferencePath::from_points(self.points)
    }
}

/// 走行目標ラベルと参照経路の対応表
#[derive(Debug, Clone, Default)]
pub struct PathLibrary {
    paths: BTreeMap<String, ReferencePath>,
}

impl PathLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// 交差点シナリオの標準経路（左折 "lt" と対向直進 "gs"）を登録したライブラリ
    ///
    /// 左折車は x=13 の北向き車線から半径8mで左折し y=2 の西向き車線へ、
    /// 直進車は y=−2 の西向き車線を走行します。
    pub fn intersection(resolution: f64) -> Self {
        let left_turn = PathBuilder::new(resolution)
            .start(Position2D::new(13.0, -15.0))
            .line_to(Position2D::new(13.0, -6.0))
            .arc(Position2D::new(5.0, -6.0), 8.0, 0.0, PI / 2.0)
            .line_to(Position2D::new(-10.0, 2.0))
            .build();
        let go_straight = ReferencePath::from_waypoints(
            &[Position2D::new(35.0, -2.0), Position2D::new(-10.0, -2.0)],
            resolution,
        );

        let mut library = Self::new();
        library.insert(LEFT_TURN, left_turn);
        library.insert(GO_STRAIGHT, go_straight);
        library
    }

    /// 経路を登録（同ラベルは上書き）
    pub fn insert(&mut self, label: impl Into<String>, path: ReferencePath) {
        self.paths.insert(label.into(), path);
    }

    pub fn contains(&self, label: &str) -> bool {
        self.paths.contains_key(label)
    }
}

impl ReferencePathProvider for PathLibrary {
    fn reference_path(&self, label: &str) -> Option<&ReferencePath> {
        self.paths.get(label)
    }

    fn labels(&self) -> Vec<String> {
        self.paths.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_waypoints_are_densified() {
        let path = ReferencePath::from_waypoints(
            &[Position2D::new(0.0, 0.0), Position2D::new(10.0, 0.0)],
            0.5,
        );
        assert_eq!(path.len(), 21);
        assert_abs_diff_eq!(path.total_length(), 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(path.arc_length()[4], 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_nearest_and_deviation() {
        let path = ReferencePath::from_waypoints(
            &[Position2D::new(0.0, 0.0), Position2D::new(10.0, 0.0)],
            1.0,
        );
        let (index, distance) = path.nearest(&Position2D::new(3.2, 1.5)).unwrap_or((0, f64::NAN));
        assert_eq!(index, 3);
        assert_abs_diff_eq!(distance, (0.2_f64.powi(2) + 1.5_f64.powi(2)).sqrt(), epsilon = 1e-9);
        assert_abs_diff_eq!(path.progress(&Position2D::new(7.9, -0.3)), 8.0, epsilon = 1e-9);
    }

    #[test]
    fn test_intersection_library_geometry() {
        let library = PathLibrary::intersection(DEFAULT_PATH_RESOLUTION);
        assert_eq!(library.labels(), vec![GO_STRAIGHT.to_string(), LEFT_TURN.to_string()]);

        let lt = library.reference_path(LEFT_TURN).expect("lt path");
        // 左折車の初期位置は参照経路上
        assert!(lt.deviation(&Position2D::new(13.0, -7.0)) < DEFAULT_PATH_RESOLUTION);
        // 9m直線 + 4πm円弧 + 15m直線
        assert_abs_diff_eq!(lt.total_length(), 9.0 + 4.0 * PI + 15.0, epsilon = 1e-2);

        let gs = library.reference_path(GO_STRAIGHT).expect("gs path");
        assert!(gs.deviation(&Position2D::new(20.0, -2.0)) < DEFAULT_PATH_RESOLUTION);
        assert!(library.reference_path("unknown").is_none());
    }
}
