use std::collections::HashSet;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use rayon::ThreadPoolBuilder;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use saihu_algo::xtfa::{AnalysisConfig, CyclicAnalysis, FeedForwardAnalysis};
use saihu_algo::{AnalysisReport, MethodRun, MethodTimer};
use saihu_core::{Diagnostics, InducedGraph, Network};
use saihu_io::{json_to_wopanet, load_network, wopanet_to_json, NetworkDescription, WopanetDescription};
use saihu_lp::{ConstraintFamily, FifoLp, LpNetwork, LpSolver, SfaLp, TfaLp};

#[derive(Parser)]
#[command(name = "saihu", version, about = "Worst-case delay analyzer for time-sensitive networks")]
struct Cli {
    /// Worker threads for the parallel feed-forward sweeps ("auto" or a count)
    #[arg(long, global = true, default_value = "auto")]
    threads: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
enum Method {
    /// Pipeline TFA (no input shaping)
    Xtfa,
    /// Pipeline TFA with input-port shaping
    XtfaShaped,
    /// Linear-program TFA
    LpTfa,
    /// Linear-program TFA with link shaping (TFA++)
    LpTfaPp,
    /// Linear-program SFA
    LpSfa,
    /// Polynomial linear program
    LpPlp,
    /// Exponential linear program
    LpElp,
    /// Every method above
    All,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a network description with the selected methods
    Analyze {
        /// Network description (.json or .xml)
        file: PathBuf,
        /// Methods to run (repeatable; defaults to the pipeline TFA)
        #[arg(long, value_enum)]
        method: Vec<Method>,
        /// Write the aggregated report as JSON instead of a table
        #[arg(long)]
        output: Option<PathBuf>,
        /// Run independent nodes of a sweep on worker threads
        #[arg(long)]
        parallel: bool,
        /// Iteration cap of the cyclic fix-point driver
        #[arg(long, default_value_t = 100)]
        max_iterations: usize,
        /// Explicit path to the lp_solve executable
        #[arg(long)]
        lp_solve: Option<PathBuf>,
    },
    /// Validate a network description and report every issue found
    Validate {
        /// Network description (.json or .xml)
        file: PathBuf,
    },
    /// Convert a description between the JSON and XML forms
    Convert {
        /// Input description (.json or .xml)
        input: PathBuf,
        /// Output description (.json or .xml)
        output: PathBuf,
    },
}

fn configure_threads(requested: &str) {
    let count = if requested.eq_ignore_ascii_case("auto") {
        num_cpus::get()
    } else {
        requested.parse().unwrap_or_else(|_| num_cpus::get())
    };
    let _ = ThreadPoolBuilder::new().num_threads(count).build_global();
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    configure_threads(&cli.threads);

    match cli.command {
        Commands::Analyze {
            file,
            method,
            output,
            parallel,
            max_iterations,
            lp_solve,
        } => analyze(
            &file,
            &method,
            output.as_deref(),
            parallel,
            max_iterations,
            lp_solve.as_deref(),
        ),
        Commands::Validate { file } => validate(&file),
        Commands::Convert { input, output } => convert(&input, &output),
    }
}

const DEFAULT_METHODS: [Method; 1] = [Method::Xtfa];

fn expand_methods(selected: &[Method]) -> Vec<Method> {
    let selected = if selected.is_empty() {
        &DEFAULT_METHODS[..]
    } else {
        selected
    };
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let all = [
        Method::Xtfa,
        Method::XtfaShaped,
        Method::LpTfa,
        Method::LpTfaPp,
        Method::LpSfa,
        Method::LpPlp,
        Method::LpElp,
    ];
    for method in selected {
        let expanded: &[Method] = if *method == Method::All { &all } else { std::slice::from_ref(method) };
        for m in expanded {
            if seen.insert(*m) {
                out.push(*m);
            }
        }
    }
    out
}

fn analyze(
    file: &Path,
    methods: &[Method],
    output: Option<&Path>,
    parallel: bool,
    max_iterations: usize,
    lp_solve: Option<&Path>,
) -> anyhow::Result<()> {
    let network = load_network(file)?;
    info!(
        network = %network.name,
        servers = network.num_servers(),
        flows = network.num_flows(),
        "network loaded"
    );

    let solver = match LpSolver::locate(lp_solve) {
        Ok(solver) => Some(solver),
        Err(err) => {
            warn!(%err, "LP methods will be skipped");
            None
        }
    };
    let work_dir = std::env::temp_dir();

    let mut runs = Vec::new();
    for method in expand_methods(methods) {
        let timer = MethodTimer::new();
        let mut run = match method {
            Method::Xtfa => run_xtfa(&network, false, parallel, max_iterations),
            Method::XtfaShaped => run_xtfa(&network, true, parallel, max_iterations),
            Method::LpTfa => run_lp(&network, solver.as_ref(), &work_dir, LpMethod::Tfa),
            Method::LpTfaPp => run_lp(&network, solver.as_ref(), &work_dir, LpMethod::TfaPp),
            Method::LpSfa => run_lp(&network, solver.as_ref(), &work_dir, LpMethod::Sfa),
            Method::LpPlp => run_lp(&network, solver.as_ref(), &work_dir, LpMethod::Plp),
            Method::LpElp => run_lp(&network, solver.as_ref(), &work_dir, LpMethod::Elp),
            Method::All => unreachable!("expanded above"),
        };
        run.exec_time = timer.elapsed_seconds();
        runs.push(run);
    }

    let report = AnalysisReport::aggregate(network.name.clone(), runs);
    match output {
        Some(path) => {
            std::fs::write(path, report.to_json()?)?;
            info!(path = %path.display(), "report written");
        }
        None => print!("{}", report.to_table()),
    }
    Ok(())
}

/// Record infinite bounds for every server and flow of the network.
fn infinite_run(network: &Network, run: &mut MethodRun) {
    for server in network.servers() {
        run.server_delays.insert(server.name.clone(), f64::INFINITY);
    }
    for flow in network.flows() {
        run.flow_delays.insert(flow.name.clone(), f64::INFINITY);
    }
}

fn run_xtfa(network: &Network, shaping: bool, parallel: bool, max_iterations: usize) -> MethodRun {
    let label = if shaping { "TFA++" } else { "TFA" };
    let mut run = MethodRun::new("xtfa", label);
    let mut config = if shaping {
        AnalysisConfig::tfa_pp()
    } else {
        AnalysisConfig::tfa()
    };
    config.parallel = parallel;
    config.cyclic.max_iterations = max_iterations;

    let gif = InducedGraph::of_network(network);
    let cyclic = !gif.is_acyclic_without(&HashSet::new());
    let outcome: Result<(), String> = if cyclic {
        match CyclicAnalysis::new(network, &mut config) {
            Ok(mut analysis) => {
                let cyclic_config = analysis.analysis.config.cyclic.clone();
                match analysis.run(&cyclic_config) {
                    Ok(outcome) if !outcome.fix_point_failure => {
                        collect_xtfa(&analysis.analysis, network, &mut run);
                        Ok(())
                    }
                    Ok(outcome) => Err(format!(
                        "fix point not reached within {} iterations",
                        outcome.iterations
                    )),
                    Err(err) => Err(err.to_string()),
                }
            }
            Err(err) => Err(err.to_string()),
        }
    } else {
        match FeedForwardAnalysis::new(network, &config) {
            Ok(mut analysis) => match analysis.run() {
                Ok(()) => {
                    collect_xtfa(&analysis, network, &mut run);
                    Ok(())
                }
                Err(err) => Err(err.to_string()),
            },
            Err(err) => Err(err.to_string()),
        }
    };
    if let Err(message) = outcome {
        warn!(method = label, %message, "method failed, recording infinite bounds");
        infinite_run(network, &mut run);
    }
    run
}

fn collect_xtfa(analysis: &FeedForwardAnalysis<'_>, network: &Network, run: &mut MethodRun) {
    for server in network.servers() {
        if let Some((_, dmax)) = analysis.node_delay(server.id) {
            run.server_delays.insert(server.name.clone(), dmax);
        }
    }
    for flow in network.flows() {
        let bound = analysis.flow_end_to_end(flow.id).unwrap_or(f64::INFINITY);
        run.flow_delays.insert(flow.name.clone(), bound);
    }
}

enum LpMethod {
    Tfa,
    TfaPp,
    Sfa,
    Plp,
    Elp,
}

fn run_lp(
    network: &Network,
    solver: Option<&LpSolver>,
    work_dir: &Path,
    method: LpMethod,
) -> MethodRun {
    let label = match method {
        LpMethod::Tfa => "TFA",
        LpMethod::TfaPp => "TFA++",
        LpMethod::Sfa => "SFA",
        LpMethod::Plp => "PLP",
        LpMethod::Elp => "ELP",
    };
    let mut run = MethodRun::new("lp", label);
    let Some(solver) = solver else {
        infinite_run(network, &mut run);
        return run;
    };
    let lp_network = match LpNetwork::from_network(network) {
        Ok(lp_network) => lp_network,
        Err(err) => {
            warn!(method = label, %err, "model conversion failed");
            infinite_run(network, &mut run);
            return run;
        }
    };

    let result: Result<Vec<f64>, saihu_lp::LpError> = match method {
        LpMethod::Tfa => {
            let tfa = TfaLp::new(&lp_network).without_shaping();
            let delays = tfa.delay_servers(solver, work_dir);
            if let Ok(delays) = &delays {
                for (server, delay) in network.servers().iter().zip(delays.iter()) {
                    run.server_delays.insert(server.name.clone(), *delay);
                }
            }
            delays.map(|d| per_flow_sums(&lp_network, &d))
        }
        LpMethod::TfaPp => {
            let tfa = TfaLp::new(&lp_network);
            let delays = tfa.delay_servers(solver, work_dir);
            if let Ok(delays) = &delays {
                for (server, delay) in network.servers().iter().zip(delays.iter()) {
                    run.server_delays.insert(server.name.clone(), *delay);
                }
            }
            delays.map(|d| per_flow_sums(&lp_network, &d))
        }
        LpMethod::Sfa => SfaLp::new(&lp_network).all_delays(solver, work_dir),
        LpMethod::Plp => {
            FifoLp::new(lp_network.clone(), ConstraintFamily::Polynomial)
                .with_tfa()
                .all_delays(solver, work_dir)
        }
        LpMethod::Elp => {
            FifoLp::new(lp_network.clone(), ConstraintFamily::Exponential)
                .all_delays(solver, work_dir)
        }
    };

    match result {
        Ok(delays) => {
            for (flow, delay) in network.flows().iter().zip(delays.iter()) {
                run.flow_delays.insert(flow.name.clone(), *delay);
            }
        }
        Err(err) => {
            warn!(method = label, %err, "LP method failed, recording infinite bounds");
            infinite_run(network, &mut run);
        }
    }
    run
}

fn per_flow_sums(network: &LpNetwork, server_delays: &[f64]) -> Vec<f64> {
    (0..network.num_flows())
        .map(|i| network.path(i).iter().map(|j| server_delays[*j]).sum())
        .collect()
}

fn validate(file: &Path) -> anyhow::Result<()> {
    let network = load_network(file)?;
    let mut diag = Diagnostics::new();
    network.validate_into(&mut diag);
    for issue in diag.issues() {
        match issue.entity.as_deref() {
            Some(entity) => println!("{:?} [{}] {}: {}", issue.severity, issue.category, entity, issue.message),
            None => println!("{:?} [{}] {}", issue.severity, issue.category, issue.message),
        }
    }
    if diag.has_errors() {
        anyhow::bail!("{} error(s) found", diag.error_count());
    }
    println!(
        "{}: {} servers, {} flows, max load {:.3}",
        network.name,
        network.num_servers(),
        network.num_flows(),
        network.max_load()
    );
    Ok(())
}

fn extension_of(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("")
}

fn convert(input: &Path, output: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(input)?;
    let description = match extension_of(input) {
        "xml" => wopanet_to_json(&WopanetDescription::from_xml(&text)?)?,
        _ => NetworkDescription::from_json(&text)?,
    };
    match extension_of(output) {
        "xml" => {
            let wopanet = json_to_wopanet(&description)?;
            std::fs::write(output, wopanet.to_xml()?)?;
        }
        _ => std::fs::write(output, description.to_json()?)?,
    }
    info!(input = %input.display(), output = %output.display(), "description converted");
    Ok(())
}
