use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use integrator::{
    config::{init_logging, Config},
    eval::{default_scenarios, load_scenarios, EvalResults, ScenarioRunner},
    metrics, KeywordAgent,
};

#[derive(Parser)]
#[command(name = "integrator-eval")]
#[command(about = "Run integration agent evaluations and compare result files")]
struct Args {
    /// Output filename inside the results directory (e.g. eval_v1.json)
    #[arg(short, long)]
    output: Option<String>,

    /// Compare two result files
    #[arg(long, num_args = 2, value_names = ["BASELINE", "CURRENT"])]
    compare: Option<Vec<PathBuf>>,

    /// Run with the keyword mock agent
    #[arg(long, conflicts_with = "real")]
    mock: bool,

    /// Run with the real integration agent (requires OPENAI_API_KEY)
    #[arg(long)]
    real: bool,

    /// Print progress during evaluation
    #[arg(short, long)]
    verbose: bool,

    /// Override the configured model
    #[arg(long)]
    model: Option<String>,

    /// Scenario file or directory (JSON/YAML); defaults to the built-in set
    #[arg(long)]
    scenarios: Option<PathBuf>,

    /// Results directory (overrides INTEGRATOR_RESULTS_DIR)
    #[arg(long)]
    results_dir: Option<PathBuf>,

    /// Print a markdown summary table for an existing result file and exit
    #[arg(long, value_name = "RESULTS")]
    summary: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let mut config = Config::from_env()?;
    init_logging(&config.log_level);
    if let Some(dir) = &args.results_dir {
        config.results_dir = dir.clone();
    }

    if let Some(paths) = &args.compare {
        let baseline = EvalResults::load(&paths[0])?;
        let current = EvalResults::load(&paths[1])?;
        metrics::compare(&baseline, &current).print();
        return Ok(());
    }

    if let Some(path) = &args.summary {
        print!("{}", EvalResults::load(path)?.summary_table());
        return Ok(());
    }

    if !args.mock && !args.real {
        println!("No agent mode specified.");
        println!("Use --mock to test with the keyword mock agent");
        println!("Use --real to run with the real integration agent (requires OPENAI_API_KEY)");
        return Ok(());
    }

    let scenarios = match &args.scenarios {
        Some(path) => load_scenarios(path)?,
        None => default_scenarios(),
    };

    let verbose = args.verbose;
    let runner = ScenarioRunner::new(scenarios)
        .with_labels(config.run_labels())
        .with_progress(move |progress| {
            if !verbose {
                return;
            }
            let request: String = progress.scenario.request.chars().take(50).collect();
            println!(
                "Running scenario {}/{}: {request}...",
                progress.index + 1,
                progress.total
            );
            let marker = if progress.result.action_correct {
                progress.result.marker().green()
            } else {
                progress.result.marker().red()
            };
            println!(
                "  {marker} Expected: {}, Got: {}",
                progress.scenario.expected_action,
                progress.result.actual_action.as_deref().unwrap_or("N/A")
            );
        });

    let (results, auto_save) = if args.real {
        println!("Running with real integration agent...");
        let agent = config.integration_agent(args.model.as_deref())?;
        println!("Using model: {}", agent.model());
        println!("Running {} scenarios...\n", runner.scenarios().len());
        (runner.run(&agent).await, true)
    } else {
        println!("Running with mock agent...");
        (runner.run(&KeywordAgent).await, false)
    };

    results.print_summary();

    if args.output.is_some() || auto_save {
        let path = results.save(&config.results_dir, args.output.as_deref())?;
        let label = if args.output.is_some() { "saved" } else { "auto-saved" };
        println!("\nResults {label} to: {}", path.display());
    }

    Ok(())
}
