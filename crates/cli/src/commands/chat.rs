//! `hearth chat` and `hearth ask`: interactive or single-turn sessions.

use std::io::Write;
use std::path::PathBuf;

use hearth_agent::{AgentLoop, IntentDecision, TurnOutcome, TurnStopReason, classify};
use hearth_config::AppConfig;
use hearth_tools::fs::display_relative;

use super::session::{TurnGuard, build_agent, load_config, spawn_printer};
use super::verify;

/// One line of REPL input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Empty,
    Exit,
    Help,
    Context,
    Clear,
    Tools,
    Undo,
    Continue,
    Verify(String),
    Unknown(String),
    Message(String),
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        match line {
            "" => Self::Empty,
            "exit" | "quit" | "/exit" | "/quit" => Self::Exit,
            "/help" => Self::Help,
            "/context" => Self::Context,
            "/clear" => Self::Clear,
            "/tools" => Self::Tools,
            "/undo" => Self::Undo,
            "/continue" => Self::Continue,
            "/verify" => Self::Verify(String::new()),
            _ => {
                if let Some(job) = line.strip_prefix("/verify ") {
                    Self::Verify(job.trim().to_string())
                } else if line.starts_with('/') {
                    Self::Unknown(line.to_string())
                } else {
                    Self::Message(line.to_string())
                }
            }
        }
    }
}

const HELP: &str = "  Commands:
    /help             Show this help
    /context          Files in context, tool budget, undo depth
    /clear            Forget the conversation and read files
    /tools            List available tools
    /undo             Revert the most recent file change
    /continue         Resume after an iteration or tool-call limit
    /verify <task>    Edit, build and test until the commands pass
    exit              Quit";

pub async fn run(root: PathBuf, message: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let mut agent = build_agent(&root, &config)?;

    if let Some(message) = message {
        print_route(&classify(&message));
        let outcome = turn(&mut agent, Some(&message)).await;
        if let TurnStopReason::Error(e) = outcome.stop_reason {
            return Err(e.into());
        }
        return Ok(());
    }

    println!();
    println!("  Hearth — interactive mode");
    println!("  Model:   {}", config.model.model);
    println!("  Project: {}", root.display());
    println!("  Type /help for commands, Ctrl+C cancels the current turn.");
    println!();

    loop {
        let Some(line) = read_line("  You > ").await? else {
            break;
        };

        match ReplCommand::parse(&line) {
            ReplCommand::Empty => {}
            ReplCommand::Exit => break,
            ReplCommand::Help => println!("{HELP}"),
            ReplCommand::Context => println!("{}", indent(&agent.context_summary())),
            ReplCommand::Clear => {
                agent.clear_context();
                println!("  Context cleared.");
            }
            ReplCommand::Tools => {
                for name in agent.tool_names() {
                    println!("    {name}");
                }
            }
            ReplCommand::Undo => match agent.undo_last() {
                Ok(change) => println!(
                    "  Reverted {} ({})",
                    display_relative(agent.context().root(), &change.path),
                    change.action
                ),
                Err(e) => println!("  {e}"),
            },
            ReplCommand::Continue => {
                turn(&mut agent, None).await;
            }
            ReplCommand::Verify(job) => {
                if job.is_empty() {
                    println!("  Usage: /verify <what the change should accomplish>");
                } else {
                    run_verify(&root, &config, job).await;
                }
            }
            ReplCommand::Unknown(cmd) => println!("  Unknown command {cmd}. Type /help."),
            ReplCommand::Message(text) => {
                let decision = classify(&text);
                print_route(&decision);
                turn(&mut agent, Some(&text)).await;
            }
        }
        println!();
    }

    println!("  Goodbye!");
    Ok(())
}

/// Run a turn (or resume one) with live output and Ctrl-C cancellation.
async fn turn(agent: &mut AgentLoop, input: Option<&str>) -> TurnOutcome {
    let guard = TurnGuard::new();
    let (sink, printer) = spawn_printer();

    let outcome = match input {
        Some(text) => agent.process(text, &guard.cancel, Some(&sink)).await,
        None => agent.continue_turn(&guard.cancel, Some(&sink)).await,
    };

    drop(sink);
    let _ = printer.await;

    if outcome.stop_reason == TurnStopReason::Interrupted {
        println!("  [interrupted]");
    }
    outcome
}

async fn run_verify(root: &std::path::Path, config: &AppConfig, job: String) {
    let options = verify::VerifyOptions {
        prompt: job,
        commands: Vec::new(),
        max_iterations: None,
        use_unblocker: true,
    };
    match verify::execute(root, config, options).await {
        Ok(result) => println!("{}", hearth_agent::format_verification_result(&result)),
        Err(e) => println!("  [Error] {e}"),
    }
}

fn print_route(decision: &IntentDecision) {
    println!("  [{}]", decision.intent.label());
    if decision.requires_verification_loop {
        println!("  Tip: /verify <task> applies edits and runs the build until it passes.");
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|l| format!("  {l}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Read one line from stdin without blocking the runtime. `None` on EOF.
async fn read_line(prompt: &'static str) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let line = tokio::task::spawn_blocking(move || {
        let mut stdout = std::io::stdout();
        let _ = write!(stdout, "{prompt}");
        let _ = stdout.flush();
        let mut input = String::new();
        std::io::stdin().read_line(&mut input).map(|n| (n > 0).then_some(input))
    })
    .await??;
    Ok(line)
}
