//! Upscale chain worker - CLI video upscaling tool
//!
//! This worker process receives a job file via the --config argument, selects the upscale
//! chain configured for the job's slot, builds any missing TensorRT engines, renders a
//! VapourSynth script and runs the vspipe | ffmpeg pipeline.
//! Progress is reported via JSON messages on stdout.
//!
//! Plan-only mode: use --plan-only to stop after engines and the script are ready.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use upscale_chain_worker::conf_parser;
use upscale_chain_worker::dependency_locator::DependencyLocator;
use upscale_chain_worker::engine_cache::{EngineCache, TrtexecBuilder};
use upscale_chain_worker::engine_settings::PythonOnnxInspector;
use upscale_chain_worker::frame_graph::ScriptGraph;
use upscale_chain_worker::hardware::NvidiaSmiProbe;
use upscale_chain_worker::models::{LogLevel, Rational, VideoJob};
use upscale_chain_worker::pipeline_executor::PipelineExecutor;
use upscale_chain_worker::profile_runner::ProfileRunner;
use upscale_chain_worker::progress_reporter::ProgressReporter;
use upscale_chain_worker::run_context::RunContext;
use upscale_chain_worker::script_generator::ScriptGenerator;
use upscale_chain_worker::trace::PipelineTrace;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "upscale-chain-worker")]
#[command(about = "Chain-based video upscaling worker using VapourSynth")]
#[command(version)]
struct Args {
    /// Path to the job configuration JSON file
    #[arg(long)]
    config: PathBuf,

    /// Build engines and render the script without encoding
    #[arg(long)]
    plan_only: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let reporter = ProgressReporter::new();

    let cancelled = Arc::new(AtomicBool::new(false));
    let cancelled_clone = cancelled.clone();

    // Handle SIGTERM/SIGINT for graceful cancellation
    if let Err(e) = ctrlc::set_handler(move || {
        cancelled_clone.store(true, Ordering::SeqCst);
    }) {
        reporter.send_error(&format!("Failed to set signal handler: {}", e));
        return ExitCode::from(1);
    }

    match run_worker(&args, &reporter, cancelled) {
        Ok(output_path) => {
            reporter.send_complete(true, Some(&output_path));
            ExitCode::SUCCESS
        }
        Err(e) => {
            if e.to_string().contains("cancelled") {
                reporter.send_log(LogLevel::Info, "Job cancelled by user");
                reporter.send_complete(false, None);
                ExitCode::from(130) // Standard exit code for SIGINT
            } else {
                reporter.send_error(&format!("{:#}", e));
                reporter.send_complete(false, None);
                ExitCode::from(1)
            }
        }
    }
}

fn run_worker(
    args: &Args,
    reporter: &ProgressReporter,
    cancelled: Arc<AtomicBool>,
) -> Result<String> {
    reporter.send_log(LogLevel::Info, "Loading job configuration...");
    let job_content = std::fs::read_to_string(&args.config)
        .with_context(|| format!("Failed to read job file: {:?}", args.config))?;
    let job: VideoJob =
        serde_json::from_str(&job_content).with_context(|| "Failed to parse job configuration")?;

    let config_path = resolve_relative(&args.config, Path::new(&job.config_path));
    let config = conf_parser::load(&config_path)?;

    let deps = DependencyLocator::new(config.global.backend_path.as_deref())?;
    if config.global.logging {
        let log_path = deps.log_dir().join("worker.log");
        if let Err(e) = reporter.enable_log_file(&log_path) {
            reporter.send_log(
                LogLevel::Warning,
                &format!("Failed to open log file {:?}: {}", log_path, e),
            );
        }
    }

    let trace_path = deps.log_dir().join("current.log");
    PipelineTrace::truncate(&trace_path)
        .with_context(|| format!("Failed to reset trace file: {:?}", trace_path))?;

    reporter.send_log(
        LogLevel::Info,
        &format!("Processing: {} (slot {})", job.input_path, job.slot),
    );

    let env = deps.build_environment();
    let python = deps.python_executable().unwrap_or_else(|_| PathBuf::from("python"));
    let trtexec = deps.trtexec_path().unwrap_or_else(|_| PathBuf::from("trtexec"));
    let ctx = RunContext::new(
        reporter.clone(),
        EngineCache::new(deps.models_dir(), reporter.clone()),
        Box::new(PythonOnnxInspector::new(python, env.clone())),
        Box::new(TrtexecBuilder::new(trtexec, env)),
        Box::new(NvidiaSmiProbe::new(deps.nvidia_smi_path())),
    );

    // Select the chain and assemble its stages
    let mut graph = ScriptGraph::new();
    let source = graph.source(&job.video)?;
    let mut trace = PipelineTrace::new();
    let assembled = ProfileRunner::new(&ctx, &config).run(
        &mut graph,
        job.slot,
        &source,
        source.fps,
        &mut trace,
    );

    if let Err(e) = trace.write_to(&trace_path) {
        reporter.send_log(
            LogLevel::Warning,
            &format!("Failed to write trace file {:?}: {}", trace_path, e),
        );
    }
    reporter.send_trace(&trace.lines());
    let output = assembled.with_context(|| "Failed to assemble upscale pipeline")?;

    reporter.send_log(LogLevel::Info, "Generating VapourSynth script...");
    let mut script_generator = ScriptGenerator::new()?;
    let plugin_path = deps.vapoursynth_plugin_path();
    if plugin_path.exists() {
        script_generator = script_generator.with_plugin_path(plugin_path);
    }
    let script_path = script_generator
        .generate(&job, &graph, &output)
        .with_context(|| "Failed to generate VapourSynth script")?;

    reporter.send_log(
        LogLevel::Debug,
        &format!("Script written to: {:?}", script_path),
    );

    if args.plan_only {
        reporter.send_log(LogLevel::Info, "Plan ready, skipping encode");
        return Ok(script_path.to_string_lossy().to_string());
    }

    reporter.send_log(LogLevel::Info, "Starting encoding pipeline...");
    let frame_multiplier = fps_ratio(output.fps, source.fps);
    let mut executor = PipelineExecutor::new(reporter.clone(), deps);
    executor.execute(&script_path, &job, frame_multiplier, || {
        cancelled.load(Ordering::SeqCst)
    })?;

    if cancelled.load(Ordering::SeqCst) {
        if let Err(e) = std::fs::remove_file(&job.output_path) {
            reporter.send_log(
                LogLevel::Warning,
                &format!("Failed to remove partial output: {}", e),
            );
        }
        anyhow::bail!("Job cancelled");
    }

    reporter.send_log(LogLevel::Info, "Encoding complete!");
    Ok(job.output_path.clone())
}

/// Resolve `path` against the directory of `base` when it is relative.
fn resolve_relative(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    base.parent()
        .map(|dir| dir.join(path))
        .unwrap_or_else(|| path.to_path_buf())
}

/// `output / input`, or 1 when it cannot be represented.
fn fps_ratio(output: Rational, input: Rational) -> Rational {
    output
        .numerator()
        .checked_mul(input.denominator())
        .zip(output.denominator().checked_mul(input.numerator()))
        .and_then(|(num, den)| Rational::new(num, den))
        .unwrap_or(Rational::integer(1))
}
