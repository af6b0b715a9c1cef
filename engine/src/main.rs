use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::Parser;
use forkhestra_core::{
    is_variable_name, parse_chain_expr, prompt, substitute_agent_default, substitute_chain,
    ChainConfig, ChainError, ChainExecutor, ChainInputs, CliBackend,
};
use forkhestra_types::{ChainResult, ChainSpec};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "forkhestra")]
#[command(about = "Chain-driven orchestration of headless AI agents")]
#[command(after_help = "Targets are a chain expression like 'planner -> worker:5', \
plus NAME=value variable bindings when used with --chain.")]
struct Cli {
    /// Working directory for all child processes.
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Show per-iteration diagnostics on stderr.
    #[arg(long, short)]
    verbose: bool,

    /// Print the resolved plan; do not execute.
    #[arg(long)]
    dry_run: bool,

    /// Load a named chain from forge/chains.json.
    #[arg(long)]
    chain: Option<String>,

    /// Inline prompt applied to all steps (highest precedence).
    #[arg(long, short)]
    prompt: Option<String>,

    /// Prompt file applied to all steps (highest precedence).
    #[arg(long)]
    prompt_file: Option<PathBuf>,

    /// Chain expression fragments and VAR=value bindings.
    target: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match execute(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("forkhestra: {err:#}");
            ExitCode::from(2)
        }
    }
}

async fn execute(cli: Cli) -> anyhow::Result<u8> {
    let cwd = match cli.cwd {
        Some(cwd) => cwd,
        None => std::env::current_dir().context("cannot resolve working directory")?,
    };
    let (bindings, expr_parts) = partition_targets(cli.target);

    let (label, spec, agent_defaults) = if let Some(name) = &cli.chain {
        if !expr_parts.is_empty() {
            bail!(
                "--chain cannot be combined with a chain expression (unexpected: {})",
                expr_parts.join(" ")
            );
        }
        let config = ChainConfig::load(&cwd)?;
        let mut spec = config.get_chain(name)?;
        substitute_chain(&mut spec, &bindings)?;
        let mut defaults = HashMap::new();
        for step in &spec.steps {
            if let Some(mut default) = config.agent_default(&step.agent) {
                substitute_agent_default(&mut default, &bindings)?;
                defaults.insert(step.agent.clone(), default);
            }
        }
        (name.clone(), spec, defaults)
    } else {
        if expr_parts.is_empty() {
            bail!("nothing to run; pass a chain expression or --chain <name>");
        }
        let expr = expr_parts.join(" ");
        let steps = parse_chain_expr(&expr)?;
        let spec = ChainSpec::from_steps(steps);
        // agent defaults still apply in expression mode when a config exists
        let defaults = match ChainConfig::load(&cwd) {
            Ok(config) => spec
                .steps
                .iter()
                .filter_map(|step| {
                    config
                        .agent_default(&step.agent)
                        .map(|default| (step.agent.clone(), default))
                })
                .collect(),
            Err(ChainError::ConfigNotFound(_)) => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        (expr, spec, defaults)
    };
    debug!(chain = %label, steps = spec.steps.len(), "resolved chain");

    let inputs = ChainInputs {
        cli_prompt: cli.prompt,
        cli_prompt_file: cli.prompt_file,
        agent_defaults,
    };

    if cli.dry_run {
        print_plan(&label, &spec, &inputs, &cwd)?;
        return Ok(0);
    }

    let backend = CliBackend;
    let result = ChainExecutor::new(&backend, &cwd).run(&spec, &inputs).await?;
    print_summary(&spec, &result);
    Ok(if result.success { 0 } else { 1 })
}

/// Positional tokens shaped like `NAME=value` are variable bindings; the
/// rest joins into the chain expression.
fn partition_targets(targets: Vec<String>) -> (HashMap<String, String>, Vec<String>) {
    let mut bindings = HashMap::new();
    let mut expr_parts = Vec::new();
    for token in targets {
        match token.split_once('=') {
            Some((name, value)) if is_variable_name(name) => {
                bindings.insert(name.to_string(), value.to_string());
            }
            _ => expr_parts.push(token),
        }
    }
    (bindings, expr_parts)
}

fn print_plan(
    label: &str,
    spec: &ChainSpec,
    inputs: &ChainInputs,
    cwd: &std::path::Path,
) -> anyhow::Result<()> {
    println!("chain: {label}");
    if let Some(description) = &spec.description {
        println!("description: {description}");
    }
    for (index, step) in spec.steps.iter().enumerate() {
        let mode = if step.loop_mode {
            format!("loop up to {} iterations", step.max_iterations)
        } else {
            "run once".to_string()
        };
        println!("  {}. {}  ({mode})", index + 1, step.agent);
        let mut args = spec.args.clone();
        args.extend(step.args.iter().cloned());
        if !args.is_empty() {
            println!("     args: {}", args.join(" "));
        }
        let scopes = prompt::PromptScopes {
            cli_prompt: inputs.cli_prompt.as_deref(),
            cli_prompt_file: inputs.cli_prompt_file.as_deref(),
            step: Some(step),
            chain: Some(spec),
            agent_default: inputs.agent_defaults.get(&step.agent),
        };
        match prompt::resolve_text(&scopes, cwd)? {
            Some(text) => println!("     prompt: {}", first_line(&text)),
            None => println!("     prompt: (none)"),
        }
    }
    Ok(())
}

fn first_line(text: &str) -> String {
    let line = text.lines().next().unwrap_or("");
    if text.lines().count() > 1 {
        format!("{line} …")
    } else {
        line.to_string()
    }
}

fn print_summary(spec: &ChainSpec, result: &ChainResult) {
    println!();
    println!("chain summary:");
    for step in &result.steps {
        let mark = if step.run.complete { "ok  " } else { "FAIL" };
        println!(
            "  {} {}. {}  {} ({} iteration{}, exit {})",
            mark,
            step.index + 1,
            step.agent,
            step.run.reason.as_str(),
            step.run.iterations,
            if step.run.iterations == 1 { "" } else { "s" },
            step.run.exit_code,
        );
    }
    let skipped = spec.steps.len() - result.steps.len();
    if skipped > 0 {
        println!("  ({skipped} step{} not run)", if skipped == 1 { "" } else { "s" });
    }
    match result.failed_at {
        None => println!("chain complete"),
        Some(index) => println!(
            "chain failed at step {} ({})",
            index + 1,
            spec.steps[index].agent
        ),
    }
}
