// src/main.rs
// 无界面的演示入口：加载/生成初始数据，跑一段测量，输出分析并导出
use std::path::PathBuf;
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{info, warn};

use quantum_meter::telemetry::PlotStyle;
use quantum_meter::{
    MeasurementPipeline, MeterError, PipelineConfig, PipelineEvent, RECENT_PLOT_WINDOW,
    RECENT_TABLE_WINDOW,
};

const DEFAULT_RUN_SECONDS: u64 = 10;

fn load_config(path: Option<PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_json_file(&path)
            .with_context(|| format!("reading config {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

// 启动时优先读取样例文件，失败则生成演示数据
fn seed_initial_data(pipeline: &MeasurementPipeline) -> Result<usize> {
    let config = pipeline.config();
    if let Some(file) = config.sample_file.as_deref().filter(|p| p.exists()) {
        match pipeline.load_from_file(file) {
            Ok(count) => return Ok(count),
            Err(err) => warn!("could not load sample file {}: {err}", file.display()),
        }
    }
    Ok(pipeline.load_demo_dataset(config.demo_points)?)
}

fn print_report(pipeline: &MeasurementPipeline) -> Result<()> {
    match pipeline.analyze() {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            println!("quality: {:.1}% ({:?})", report.quality_score * 100.0, report.grade());
        }
        Err(MeterError::InsufficientData { required, actual }) => {
            println!("no analysis yet ({actual}/{required} samples)");
        }
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

// 入口函数
fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let config = load_config(args.next().map(PathBuf::from))?;
    let run_for = match args.next() {
        Some(raw) => raw.parse::<u64>().context("run seconds must be an integer")?,
        None => DEFAULT_RUN_SECONDS,
    };

    let pipeline = MeasurementPipeline::new(config).context("building pipeline")?;
    let seeded = seed_initial_data(&pipeline)?;
    info!("start-up dataset: {seeded} points");
    println!("{}", serde_json::to_string_pretty(&pipeline.status())?);

    let subscription = pipeline.subscribe();
    pipeline.connect();
    pipeline
        .start(pipeline.config().sampling_rate_hz)
        .context("starting measurement")?;

    let deadline = Instant::now() + Duration::from_secs(run_for);
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match subscription.receiver.recv_timeout(remaining) {
            Ok(PipelineEvent::Sample(sample)) => println!(
                "{}  I={:.3e} A  V={:.6} V  R={:.3e} Ohm  T={:.1} C",
                sample.timestamp.format("%H:%M:%S"),
                sample.effective_current(),
                sample.voltage,
                sample.resistance,
                sample.temperature
            ),
            Ok(PipelineEvent::AnomaliesDetected { current, voltage }) => {
                println!("detected {current} current / {voltage} voltage anomalies")
            }
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    pipeline.stop();
    println!("last {} readings kept: {}", RECENT_TABLE_WINDOW, pipeline.window(RECENT_TABLE_WINDOW).len());
    print_report(&pipeline)?;

    let export_dir = pipeline.config().export_dir.clone();
    match pipeline.export_to_dir(&export_dir) {
        Ok(path) => {
            println!("data exported to {}", path.display());
            let png = path.with_extension("png");
            match pipeline.export_plot_png(&png, RECENT_PLOT_WINDOW, &PlotStyle::default()) {
                Ok(()) => println!("plot written to {}", png.display()),
                Err(err) => warn!("plot export failed: {err}"),
            }
        }
        Err(MeterError::NoData) => println!("no measurement data to export"),
        Err(err) => return Err(err).context("exporting measurements"),
    }

    pipeline.disconnect();
    Ok(())
}
