//! ChoreoAtlas CLI: lint flow specs, validate them against traces, and
//! record baselines for relative gating.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use choreoatlas_baseline::{evaluate_gate, load_baseline, record_baseline, save_baseline, ThresholdConfig};
use choreoatlas_report::{write_json_report, write_junit_report};
use choreoatlas_spec::{load_flow_spec, FlowSpec, OpIndex};
use choreoatlas_trace::{load_otlp_trace, load_trace, Trace};
use choreoatlas_validate::{
    has_errors, lint_flow, validate_against_trace, CausalityMode, StepResult, ValidationConfig,
};

mod exitcode;

#[derive(Parser)]
#[command(name = "choreoatlas", about = "Contract-as-Code validation for service choreography")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Statically lint a FlowSpec and its ServiceSpecs
    Lint {
        /// Path to the FlowSpec YAML
        #[arg(long)]
        flow: PathBuf,
    },

    /// Validate a FlowSpec against a trace, then evaluate the gate
    Validate(ValidateArgs),

    /// Baseline management
    Baseline {
        #[command(subcommand)]
        command: BaselineCommands,
    },
}

#[derive(clap::Args)]
struct ValidateArgs {
    /// Path to the FlowSpec YAML
    #[arg(long)]
    flow: PathBuf,

    /// Path to the trace file
    #[arg(long)]
    trace: PathBuf,

    /// Trace file format
    #[arg(long, value_enum, default_value_t = TraceFormat::Auto)]
    trace_format: TraceFormat,

    /// Disable pre/postcondition evaluation
    #[arg(long)]
    no_semantic: bool,

    /// Causality checking mode
    #[arg(long, value_enum, default_value_t = CausalityModeArg::Temporal)]
    causality: CausalityModeArg,

    /// Tolerance for causal edge constraints, in milliseconds
    #[arg(long, default_value_t = 50)]
    tolerance_ms: i64,

    /// Baseline file for relative gate evaluation
    #[arg(long)]
    baseline: Option<PathBuf>,

    /// Steps threshold (coverage floor, or tolerated degradation with a baseline)
    #[arg(long, default_value_t = 0.9)]
    threshold_steps: f64,

    /// Conditions threshold (pass-rate floor, or tolerated degradation with a baseline)
    #[arg(long, default_value_t = 0.95)]
    threshold_conditions: f64,

    /// Count SKIPped conditions as failures in the gate
    #[arg(long)]
    skip_as_fail: bool,

    /// Report format to write
    #[arg(long, value_enum)]
    report_format: Option<ReportFormat>,

    /// Report output path
    #[arg(long)]
    report_out: Option<PathBuf>,
}

#[derive(Subcommand)]
enum BaselineCommands {
    /// Validate a flow and record the outcome as a baseline
    Record {
        /// Path to the FlowSpec YAML
        #[arg(long)]
        flow: PathBuf,

        /// Path to the trace file
        #[arg(long)]
        trace: PathBuf,

        /// Trace file format
        #[arg(long, value_enum, default_value_t = TraceFormat::Auto)]
        trace_format: TraceFormat,

        /// Output path for the baseline JSON
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TraceFormat {
    /// Decide by file name (`*.otlp.json` selects OTLP)
    Auto,
    Native,
    Otlp,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CausalityModeArg {
    Strict,
    Temporal,
    Off,
}

impl From<CausalityModeArg> for CausalityMode {
    fn from(arg: CausalityModeArg) -> Self {
        match arg {
            CausalityModeArg::Strict => CausalityMode::Strict,
            CausalityModeArg::Temporal => CausalityMode::Temporal,
            CausalityModeArg::Off => CausalityMode::Off,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ReportFormat {
    Json,
    Junit,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::try_parse().unwrap_or_else(|e| {
        let _ = e.print();
        std::process::exit(exitcode::CLI_ERROR);
    });

    let code = match cli.command {
        Commands::Lint { flow } => run_lint(&flow),
        Commands::Validate(args) => run_validate(&args),
        Commands::Baseline {
            command:
                BaselineCommands::Record {
                    flow,
                    trace,
                    trace_format,
                    out,
                },
        } => run_baseline_record(&flow, &trace, trace_format, &out),
    };
    std::process::exit(code);
}

fn run_lint(flow_path: &Path) -> i32 {
    let (fs, op_index) = match load_spec_bundle(flow_path) {
        Ok(bundle) => bundle,
        Err(code) => return code,
    };

    let issues = lint_flow(&fs, &op_index);
    for issue in &issues {
        println!("[{}] {}", issue.level, issue.msg);
    }
    if has_errors(&issues) {
        return exitcode::INPUT_ERROR;
    }
    println!("lint passed: {} step(s)", fs.steps_count());
    exitcode::OK
}

fn run_validate(args: &ValidateArgs) -> i32 {
    let (fs, op_index) = match load_spec_bundle(&args.flow) {
        Ok(bundle) => bundle,
        Err(code) => return code,
    };

    // Lint errors short-circuit: no trace is loaded on a broken spec
    let issues = lint_flow(&fs, &op_index);
    for issue in &issues {
        println!("[{}] {}", issue.level, issue.msg);
    }
    if has_errors(&issues) {
        return exitcode::INPUT_ERROR;
    }

    let trace = match load_trace_file(&args.trace, args.trace_format) {
        Ok(trace) => trace,
        Err(code) => return code,
    };

    let config = ValidationConfig {
        enable_semantic: !args.no_semantic,
        causality_mode: args.causality.into(),
        causality_tolerance_ms: args.tolerance_ms,
    };
    let (results, validation_ok) = validate_against_trace(&fs, &op_index, &trace, &config);
    print_results(&results);

    let baseline = match &args.baseline {
        Some(path) => match load_baseline(path) {
            Ok(b) => Some(b),
            Err(e) => {
                eprintln!("error: {}", e);
                return exitcode::INPUT_ERROR;
            }
        },
        None => None,
    };

    // The gate always runs so CI sees why, even when validation failed
    let thresholds = ThresholdConfig {
        steps_threshold: args.threshold_steps,
        conditions_threshold: args.threshold_conditions,
        skip_as_fail: args.skip_as_fail,
    };
    let gate = evaluate_gate(&results, &thresholds, baseline.as_ref());
    for violation in &gate.violations {
        println!("[GATE] {}", violation);
    }

    if let Some(format) = args.report_format {
        let out = args
            .report_out
            .clone()
            .unwrap_or_else(|| default_report_path(format));
        let written = match format {
            ReportFormat::Json => write_json_report(&out, &results, Some(&gate)),
            ReportFormat::Junit => write_junit_report(&out, &results, Some(&gate)),
        };
        match written {
            Ok(()) => println!("report written to {}", out.display()),
            Err(e) => {
                eprintln!("error: {}", e);
                return exitcode::INPUT_ERROR;
            }
        }
    }

    exitcode::exit_code_for(validation_ok, gate.passed)
}

fn run_baseline_record(
    flow_path: &Path,
    trace_path: &Path,
    trace_format: TraceFormat,
    out: &Path,
) -> i32 {
    let (fs, op_index) = match load_spec_bundle(flow_path) {
        Ok(bundle) => bundle,
        Err(code) => return code,
    };
    let trace = match load_trace_file(trace_path, trace_format) {
        Ok(trace) => trace,
        Err(code) => return code,
    };

    let (results, _) =
        validate_against_trace(&fs, &op_index, &trace, &ValidationConfig::default());
    print_results(&results);

    let baseline = match record_baseline(&fs, &results, flow_path) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("error: {}", e);
            return exitcode::INPUT_ERROR;
        }
    };
    if let Err(e) = save_baseline(&baseline, out) {
        eprintln!("error: {}", e);
        return exitcode::INPUT_ERROR;
    }
    println!(
        "baseline recorded to {} ({}/{} steps covered)",
        out.display(),
        baseline.covered_steps.len(),
        baseline.steps_total
    );
    exitcode::OK
}

fn load_spec_bundle(flow_path: &Path) -> Result<(FlowSpec, OpIndex), i32> {
    let fs = load_flow_spec(flow_path).map_err(|e| {
        eprintln!("error: {}", e);
        exitcode::INPUT_ERROR
    })?;
    let (_, op_index) = fs.build_operation_index(flow_path).map_err(|e| {
        eprintln!("error: {}", e);
        exitcode::INPUT_ERROR
    })?;
    debug!(steps = fs.steps_count(), services = op_index.len(), "spec loaded");
    Ok((fs, op_index))
}

fn load_trace_file(path: &Path, format: TraceFormat) -> Result<Trace, i32> {
    let use_otlp = match format {
        TraceFormat::Otlp => true,
        TraceFormat::Native => false,
        TraceFormat::Auto => path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(".otlp.json")),
    };
    let loaded = if use_otlp {
        load_otlp_trace(path)
    } else {
        load_trace(path)
    };
    loaded.map_err(|e| {
        eprintln!("error: {}", e);
        exitcode::INPUT_ERROR
    })
}

fn print_results(results: &[StepResult]) {
    for result in results {
        match &result.message {
            Some(message) => println!("[{}] {} ({}): {}", result.status, result.step, result.call, message),
            None => println!("[{}] {} ({})", result.status, result.step, result.call),
        }
        for condition in &result.conditions {
            match &condition.message {
                Some(message) => println!(
                    "    [{}] {}:{} {} - {}",
                    condition.status, condition.kind, condition.name, condition.expr, message
                ),
                None => println!(
                    "    [{}] {}:{} {}",
                    condition.status, condition.kind, condition.name, condition.expr
                ),
            }
        }
    }
}

fn default_report_path(format: ReportFormat) -> PathBuf {
    match format {
        ReportFormat::Json => PathBuf::from("report.json"),
        ReportFormat::Junit => PathBuf::from("report.xml"),
    }
}
