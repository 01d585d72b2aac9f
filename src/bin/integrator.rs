use std::{
    fs,
    io::{self, BufRead, Write},
    path::PathBuf,
};

use clap::Parser;
use colored::Colorize;
use integrator::{
    config::{init_logging, Config},
    ActionAgent, ActionInput, AgentResponse, AgentTrace, IntegrationAgent, WorkflowContext,
};
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Parser)]
#[command(name = "integrator")]
#[command(about = "Configure API integrations with natural language")]
struct Args {
    /// Natural language request for the integration
    request: Option<String>,

    /// JSON object with workflow variables
    #[arg(short, long, default_value = "{}")]
    context: String,

    /// JSON file with `{"user_input": ..., "variables": {...}}` or plain variables
    #[arg(short = 'f', long)]
    context_file: Option<PathBuf>,

    /// Run an interactive session
    #[arg(short, long)]
    interactive: bool,

    /// Show the agent's reasoning trace
    #[arg(long)]
    debug: bool,

    /// Override the configured model
    #[arg(long)]
    model: Option<String>,

    /// Print the response as JSON
    #[arg(long)]
    json: bool,

    /// Suppress the banner
    #[arg(long)]
    no_header: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ContextFile {
    Workflow {
        #[serde(default)]
        user_input: Option<String>,
        variables: Map<String, Value>,
    },
    Variables(Map<String, Value>),
}

impl ContextFile {
    fn into_parts(self) -> (Option<String>, Map<String, Value>) {
        match self {
            Self::Workflow {
                user_input,
                variables,
            } => (user_input, variables),
            Self::Variables(variables) => (None, variables),
        }
    }
}

fn print_header() {
    println!(
        "
╔══════════════════════════════════════════════════════════════╗
║              Integration Agent CLI                           ║
║         Configure API integrations with natural language     ║
╚══════════════════════════════════════════════════════════════╝
"
    );
}

fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        if !line.is_empty() && line.chars().count() + word.chars().count() + 1 > width {
            lines.push(std::mem::take(&mut line));
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(word);
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

fn print_trace(trace: &AgentTrace) {
    let heavy = "═".repeat(70);
    println!("\n{}", heavy.bold());
    println!("{}", "AGENT REASONING TRACE".bold().cyan());
    println!("{}", heavy.bold());
    println!(
        "{}",
        format!(
            "Model: {} | Duration: {:.0}ms | Tool Calls: {}",
            trace.model_name,
            trace.total_duration_ms,
            trace.tool_calls.len()
        )
        .dimmed()
    );
    println!("{heavy}");

    for step in &trace.steps {
        println!("\n{}", format!("Step {}", step.step_number).bold().yellow());
        println!("{}", "─".repeat(50));

        if let Some(thought) = &step.thought {
            println!("{}", "Thought:".cyan());
            for line in wrap(thought, 64) {
                println!("   {line}");
            }
        }

        if let Some(action) = &step.action {
            println!("\n{} {action}", "Action:".green());
        }

        match &step.action_input {
            ActionInput::None => {}
            ActionInput::Structured(map) => {
                println!("{}", "Input:".blue());
                for (key, value) in map {
                    let value = match value {
                        Value::String(text) => text.clone(),
                        other => other.to_string(),
                    };
                    println!("      {} {}", format!("{key}:").dimmed(), integrator::trace::truncate(&value, 50));
                }
            }
            ActionInput::Text(text) => {
                println!("{}", "Input:".blue());
                println!("      {text}");
            }
        }

        if let Some(observation) = &step.observation {
            println!("\n{}", "Observation:".yellow());
            let observation = integrator::trace::truncate(observation, 400);
            for line in observation.lines().filter(|line| !line.trim().is_empty()).take(10) {
                println!("      {}", line.chars().take(80).collect::<String>());
            }
        }
    }

    println!("\n{}", heavy.bold());
    println!(
        "{}",
        format!("✓ Agent completed reasoning in {} steps", trace.steps.len()).green()
    );
    println!("{heavy}\n");
}

fn print_response(response: &AgentResponse, show_trace: bool) {
    if show_trace {
        if let Some(trace) = &response.trace {
            print_trace(trace);
        }
    }

    let rule = "─".repeat(60);
    println!("\n{rule}");
    println!("{}", "AGENT RESPONSE".bold());
    println!("{rule}");

    println!(
        "\n{} {}",
        "Selected Action:".green(),
        response.selected_action.bold()
    );

    println!("\n{}", "Reasoning:".cyan());
    for paragraph in response.reasoning.lines() {
        for line in wrap(paragraph, 70) {
            println!("   {line}");
        }
    }

    println!("\n{}", "Proposed Configuration (template):".blue());
    for line in response.proposed_config.lines() {
        println!("   {line}");
    }

    if let (Some(trace), false) = (&response.trace, show_trace) {
        println!(
            "\n{}",
            format!(
                "Tip: use --debug to see the reasoning trace ({} steps, {} tool calls)",
                trace.steps.len(),
                trace.tool_calls.len()
            )
            .dimmed()
        );
    }

    println!("\n{rule}");
}

fn print_help() {
    println!(
        "
{}
  set <key> <value>  - Set a workflow variable
  vars               - Show current variables
  clear              - Clear all variables
  debug              - Toggle the reasoning trace
  help               - Show this help
  quit               - Exit interactive mode

{}
  set summary \"Build completed successfully\"
  set slack_channel \"#alerts\"
  Post the summary to Slack
",
        "Available Commands:".bold(),
        "Example:".bold()
    );
}

async fn run_interactive(mut agent: IntegrationAgent) -> io::Result<()> {
    println!("\n{}", "Interactive Mode".bold());
    println!("Type your integration request, or 'quit' to exit.");
    println!("Commands: 'set <key> <value>', 'vars', 'clear', 'debug', 'help', 'quit'");
    if agent.trace_enabled() {
        println!("{}", "✓ Debug mode enabled, showing reasoning traces".green());
    }
    println!();

    let mut variables = Map::new();
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("{} ", "You>".bold());
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            println!("\nGoodbye!");
            break;
        };
        let input = line?;
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        let command = input.to_lowercase();
        match command.as_str() {
            "quit" | "exit" | "q" => {
                println!("Goodbye!");
                break;
            }
            "vars" => {
                let pretty = serde_json::to_string_pretty(&variables).unwrap_or_default();
                println!("{} {pretty}", "Current variables:".cyan());
                continue;
            }
            "clear" => {
                variables.clear();
                println!("{}", "✓ Cleared all variables".green());
                continue;
            }
            "debug" => {
                let enabled = !agent.trace_enabled();
                agent.set_trace(enabled);
                let status = if enabled { "enabled" } else { "disabled" };
                println!("{}", format!("✓ Debug mode {status}").green());
                continue;
            }
            "help" => {
                print_help();
                continue;
            }
            _ => {}
        }

        if command.starts_with("set ") {
            match input[4..].trim().split_once(' ') {
                Some((key, value)) => {
                    let value = serde_json::from_str(value.trim())
                        .unwrap_or_else(|_| Value::String(value.trim().to_string()));
                    println!("{}", format!("✓ Set {key} = {value}").green());
                    variables.insert(key.to_string(), value);
                }
                None => println!("Usage: set <key> <value>"),
            }
            continue;
        }

        println!("\n{}", "Processing...".yellow());
        let context = WorkflowContext::new(variables.clone()).with_user_input(input);
        let response = agent
            .run(input, &context)
            .await
            .unwrap_or_else(AgentResponse::error);
        print_response(&response, agent.trace_enabled());
        println!();
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = Config::from_env()?;
    init_logging(&config.log_level);

    if args.request.is_none() && !args.interactive && args.context_file.is_none() {
        eprintln!("Error: provide a request, use --interactive, or pass a context file with user_input");
        std::process::exit(1);
    }

    if !args.no_header && !args.json {
        print_header();
    }

    let agent = match config.integration_agent(args.model.as_deref()) {
        Ok(agent) => agent,
        Err(error) => {
            eprintln!("{} {error}", "Configuration Error:".red());
            std::process::exit(1);
        }
    };
    let agent = agent.with_trace(args.debug || config.verbose);

    if !args.json {
        println!("{}", format!("✓ Using model: {}", agent.model()).green());
        if args.debug {
            println!("{}", "✓ Debug mode enabled, will show reasoning trace".cyan());
        }
    }

    if args.interactive {
        run_interactive(agent).await?;
        return Ok(());
    }

    let (file_request, variables) = match &args.context_file {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            serde_json::from_str::<ContextFile>(&content)?.into_parts()
        }
        None => {
            let variables: Map<String, Value> = serde_json::from_str(&args.context)?;
            (None, variables)
        }
    };

    let Some(request) = args.request.clone().or(file_request) else {
        eprintln!("Error: no request provided. Pass one as an argument or include user_input in the context file.");
        std::process::exit(1);
    };

    if !args.json {
        println!("{} {request}", "Request:".blue());
        if !variables.is_empty() {
            let names: Vec<&str> = variables.keys().map(String::as_str).collect();
            println!("{} {}", "Variables:".blue(), names.join(", "));
        }
        println!("\n{}\n", "Processing...".yellow());
    }

    let context = WorkflowContext::new(variables).with_user_input(request.clone());
    let response = match agent.run(&request, &context).await {
        Ok(response) => response,
        Err(error) => {
            tracing::error!(%error, "agent run failed");
            eprintln!("{} {error}", "Error:".red());
            std::process::exit(1);
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response, args.debug);
    }

    Ok(())
}
