use clap::{Arg, Command};
use std::f64::consts::PI;
use std::str::FromStr;

use ipvsim::analysis::{detect_segments, within_distance, SegmentAnalyzer};
use ipvsim::game::{GameConfig, GameEnvironment, IbrGame, PlayerContext};
use ipvsim::logging::{init_logging, level_for_verbosity, LogConfig, LogOutput};
use ipvsim::models::{
    common::{Position2D, StateSample, Velocity2D},
    reference::{GO_STRAIGHT, LEFT_TURN},
};
use ipvsim::scenario::ScenarioConfig;
use ipvsim::simulation::{SimulationEngine, SimulationReport};

/// 再推定で相互作用中とみなす2台間の距離（m）
const INTERACTION_RADIUS_M: f64 = 30.0;

fn main() {
    // コマンドライン引数の解析
    let matches = Command::new("ipvsim")
        .version("0.1.0")
        .about("IPVゲームシミュレーション (IPV Game Simulation)")
        .long_about(
            "2台の車両の相互作用を反復最適応答ゲームで解き、\n\
             観測軌道から相手のIPV（相互作用選好値）を推定します。",
        )
        .arg(
            Arg::new("scenario")
                .short('s')
                .long("scenario")
                .value_name("FILE")
                .help("シナリオファイル(.yaml)のパスを指定")
                .long_help(
                    "実行するシナリオファイル(.yaml)のパスを指定します。\n\
                     指定しない場合、使用方法を表示します。",
                ),
        )
        .arg(
            Arg::new("info")
                .short('i')
                .long("info")
                .action(clap::ArgAction::SetTrue)
                .help("シナリオの情報のみ表示して終了")
                .conflicts_with("test"),
        )
        .arg(
            Arg::new("test")
                .short('t')
                .long("test")
                .action(clap::ArgAction::SetTrue)
                .help("左折シナリオのIBRを1回解いて表示")
                .conflicts_with("info"),
        )
        .arg(
            Arg::new("reestimate")
                .short('r')
                .long("reestimate")
                .action(clap::ArgAction::SetTrue)
                .help("シミュレーション後、走行軌道からIPVをオフライン再推定")
                .conflicts_with("info"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(clap::ArgAction::Count)
                .help("詳細出力レベル (-v: 基本, -vv: 詳細, -vvv: デバッグ)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("ログレベル（省略時は -v の回数から決定）"),
        )
        .arg(
            Arg::new("log-output")
                .long("log-output")
                .value_name("OUTPUT")
                .default_value("console")
                .value_parser(["console", "file", "both"])
                .help("ログ出力先 (console, file, both)"),
        )
        .get_matches();

    println!("IPVゲームシミュレーション - ipvsim v0.1.0");
    println!();

    // 詳細レベルの設定
    let verbose_level = matches.get_count("verbose");
    if verbose_level > 0 {
        println!("詳細出力レベル: {}", verbose_level);
    }

    let log_config = LogConfig {
        level: level_for_verbosity(matches.get_one::<String>("log-level").map(String::as_str), verbose_level),
        output: matches
            .get_one::<String>("log-output")
            .and_then(|s| LogOutput::from_str(s).ok())
            .unwrap_or(LogOutput::Console),
        ..LogConfig::default()
    };
    if let Err(e) = init_logging(log_config) {
        eprintln!("警告: ログの初期化に失敗しました: {}", e);
    }

    // テストモードの実行
    if matches.get_flag("test") {
        println!("=== 左折シナリオ IBR テストモード ===");
        if let Err(e) = run_left_turn_demo() {
            eprintln!("エラー: {}", e);
            std::process::exit(1);
        }
        return;
    }

    // シナリオファイルの処理
    if let Some(scenario_path) = matches.get_one::<String>("scenario") {
        let options = RunOptions {
            info_only: matches.get_flag("info"),
            reestimate: matches.get_flag("reestimate"),
            verbose_level,
        };
        match run_scenario(scenario_path, options) {
            Ok(_) => {
                if verbose_level > 0 {
                    println!("シナリオ実行が正常に完了しました。");
                }
            }
            Err(e) => {
                eprintln!("エラー: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        // デフォルト動作: 利用可能なシナリオ一覧を表示
        show_default_help();
    }
}

struct RunOptions {
    info_only: bool,
    reestimate: bool,
    verbose_level: u8,
}

/// 左折車（IPV π/3）と対向直進車（IPV 0）のIBRを1回解いて軌道を表示
fn run_left_turn_demo() -> Result<(), Box<dyn std::error::Error>> {
    let env = GameEnvironment::intersection(GameConfig::default())?;
    let lt = PlayerContext::new(
        StateSample::new(Position2D::new(13.0, -7.0), Velocity2D::new(0.0, 2.0), PI / 3.0),
        PI / 3.0,
        env.reference_path(LEFT_TURN)?,
    );
    let gs = PlayerContext::new(
        StateSample::new(Position2D::new(20.0, -2.0), Velocity2D::new(-2.0, 0.0), PI),
        0.0,
        env.reference_path(GO_STRAIGHT)?,
    );

    let outcome = IbrGame::from_env(&env).play(&lt, &gs, env.config().track_len);

    println!(
        "反復回数: {} ({:?})",
        outcome.iterations, outcome.termination
    );
    println!();
    println!("{:>4} {:>9} {:>9} | {:>9} {:>9}", "k", "lt.x", "lt.y", "gs.x", "gs.y");
    for (k, (a, b)) in outcome.own.samples().iter().zip(outcome.counterpart.samples()).enumerate() {
        println!("{:>4} {:>9.3} {:>9.3} | {:>9.3} {:>9.3}", k, a.x, a.y, b.x, b.y);
    }

    let cost = env.cost_model();
    let terms = cost.interior_terms(&outcome.own, lt.path);
    println!();
    println!("左折車の平均経路逸脱: {:.3}m", terms.mean_deviation);

    Ok(())
}

/// シナリオファイルを読み込んで実行
fn run_scenario(scenario_path: &str, options: RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    let scenario = ScenarioConfig::from_file(scenario_path)?;

    if options.verbose_level > 0 {
        println!("シナリオファイル読み込み完了: {}", scenario_path);
    }

    // 情報表示のみの場合
    if options.info_only {
        scenario.print_summary();
        return Ok(());
    }

    execute_scenario(scenario, options)
}

/// シナリオの実行
fn execute_scenario(scenario: ScenarioConfig, options: RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    scenario.print_summary();
    println!();

    let mut simulation = SimulationEngine::new(scenario, options.verbose_level)?;
    simulation.initialize()?;
    let report = simulation.run()?;
    report.print_summary();

    if options.reestimate {
        reestimate_run(&simulation, &report)?;
    }

    Ok(())
}

/// 走行済みの軌道から両車両のIPVを再推定して表示
fn reestimate_run(simulation: &SimulationEngine, report: &SimulationReport) -> Result<(), Box<dyn std::error::Error>> {
    let [ego, counterpart] = simulation.agents();
    let ego_track: Vec<Option<StateSample>> = ego.observed().iter().copied().map(Some).collect();
    let counterpart_track: Vec<Option<StateSample>> = counterpart.observed().iter().copied().map(Some).collect();

    let segments = detect_segments(
        &ego_track,
        std::slice::from_ref(&counterpart_track),
        within_distance(INTERACTION_RADIUS_M),
    );

    println!("=== オフライン再推定 ===");
    if segments.is_empty() {
        println!("相互作用区間が見つかりませんでした。");
        return Ok(());
    }

    let analyzer = SegmentAnalyzer::new(simulation.env(), &ego.state().target, &counterpart.state().target)?;
    for segment in &segments {
        println!(
            "区間: フレーム {}〜{} ({} と {})",
            segment.start, segment.end, ego.id, counterpart.id
        );
        let rows = analyzer.reestimate(&ego_track, &counterpart_track, segment)?;
        if rows.is_empty() {
            println!("  観測フレームが不足しているため推定できません。");
            continue;
        }
        println!(
            "{:>6} {:>10} {:>10} {:>10} {:>10}",
            "frame",
            format!("{}.ipv", ego.id),
            "error",
            format!("{}.ipv", counterpart.id),
            "error"
        );
        for row in &rows {
            println!(
                "{:>6} {:>10.3} {:>10.3} {:>10.3} {:>10.3}",
                row.frame, row.ego_ipv, row.ego_error, row.counterpart_ipv, row.counterpart_error
            );
        }
    }

    for agent in &report.agents {
        println!("{} の真のIPV: {:.3}rad", agent.id, agent.true_ipv);
    }

    Ok(())
}

/// デフォルトヘルプとシナリオ一覧を表示
fn show_default_help() {
    println!("使用方法:");
    println!("  ipvsim [オプション]");
    println!();
    println!("オプション:");
    println!("  -s, --scenario <FILE>   シナリオファイルを指定して実行");
    println!("  -i, --info              シナリオ情報のみ表示");
    println!("  -t, --test              左折シナリオのIBRテスト実行");
    println!("  -r, --reestimate        実行後に走行軌道からIPVを再推定");
    println!("  -v, --verbose           詳細出力 (複数指定で詳細レベル上昇)");
    println!("      --log-level <LEVEL> ログレベル (trace, debug, info, warn, error)");
    println!("      --log-output <OUT>  ログ出力先 (console, file, both)");
    println!("  -h, --help              このヘルプを表示");
    println!();
    println!("利用可能なシナリオファイル:");
    println!("  scenarios/left_turn.yaml       - 左折車と対向直進車の交差");
    println!("  scenarios/parallel_lanes.yaml  - 対向する平行車線（相互作用なし）");
    println!();
    println!("例:");
    println!("  ipvsim -s scenarios/left_turn.yaml");
    println!("  ipvsim -s scenarios/left_turn.yaml -v -r");
    println!("  ipvsim -s scenarios/parallel_lanes.yaml -i");
    println!("  ipvsim --test");
}
