//! Command-line interface for kiln.
//!
//! A process invocation accepts zero or more positional query strings
//! (see [`crate::query`]) and evaluates them against the standard build
//! definition rooted in the working directory:
//!
//! ```bash
//! # Evaluate a key in the default project
//! kiln externalClasspath
//!
//! # Layer configurations and name the project explicitly
//! kiln 'app/testing:externalClasspath'
//!
//! # Several commands in one query, machine-readable results
//! kiln --machine-readable-output=json 'clean; assembly'
//!
//! # Work from the local caches only
//! kiln --offline externalClasspath
//! ```
//!
//! The exit code is 0 on success; the first failed query aborts the
//! remaining ones with a non-zero exit. `--interactive` enables
//! prompting for missing key inputs and, when no queries are given, a
//! line-oriented prompt loop.

use crate::core::KilnError;
use crate::keys::standard::{self, BuildOptions, TaskRegistry};
use crate::keys::{Evaluator, TraceListener};
use crate::output::TaskResult;
use crate::query::{self, Command};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use std::io::{BufRead, Write};
use std::path::PathBuf;

/// Machine-readable output formats.
#[derive(Copy, Clone, PartialEq, Eq, Debug, ValueEnum)]
pub enum OutputFormat {
    /// One line per result, arrays tab-separated
    Shell,
    /// One JSON object per result
    Json,
}

/// The kiln command line.
#[derive(Parser, Debug)]
#[command(
    name = "kiln",
    version,
    about = "JVM build tool: scoped keys, Maven-2 resolution, assembly",
    arg_required_else_help = false
)]
pub struct Cli {
    /// Queries to evaluate, e.g. 'app/testing:externalClasspath'
    pub queries: Vec<String>,

    /// Prompt for missing key inputs; with no queries, read them from
    /// standard input
    #[arg(long)]
    pub interactive: bool,

    /// Disable remote fetches and rely on local caches only
    #[arg(long)]
    pub offline: bool,

    /// Emit results in a machine-readable format
    #[arg(long, value_enum, value_name = "FORMAT")]
    pub machine_readable_output: Option<OutputFormat>,

    /// Project root directory (defaults to the working directory)
    #[arg(long, value_name = "DIR")]
    pub project_root: Option<PathBuf>,

    /// Trace key evaluation to stderr
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Execute the parsed invocation.
    pub fn execute(self) -> Result<()> {
        let root = match &self.project_root {
            Some(root) => root.clone(),
            None => std::env::current_dir().context("Failed to determine working directory")?,
        };

        let build = standard::default_build(&BuildOptions {
            root,
            offline: self.offline,
            local_repository: None,
        })?;
        let mut evaluator = Evaluator::new(build).with_interactive(self.interactive);
        if self.interactive {
            evaluator = evaluator.with_prompter(Box::new(stdin_prompter));
        }
        if self.verbose {
            evaluator.set_listener(Some(Box::new(TraceListener::new())));
        }
        let registry = TaskRegistry::standard();

        if self.queries.is_empty() {
            if self.interactive {
                return self.prompt_loop(&evaluator, &registry);
            }
            print_available_tasks(&registry);
            return Ok(());
        }

        for raw in &self.queries {
            let parsed = query::parse(raw)?;
            for command in &parsed.commands {
                self.run_command(&evaluator, &registry, command)?;
            }
        }
        Ok(())
    }

    fn run_command(
        &self,
        evaluator: &Evaluator,
        registry: &TaskRegistry,
        command: &Command,
    ) -> Result<()> {
        let build = evaluator.build();
        let project = match &command.task.project {
            Some(name) => name.clone(),
            None => build
                .project_names()
                .first()
                .map(|name| name.to_string())
                .ok_or_else(|| KilnError::ProjectNotFound {
                    name: "<default>".to_string(),
                })?,
        };

        let mut scope = evaluator.project_scope_by_name(&project)?;
        for configuration in &command.task.configurations {
            let id = build.configuration_id(configuration).ok_or_else(|| {
                KilnError::ConfigurationNotFound {
                    name: configuration.clone(),
                }
            })?;
            scope = evaluator.layer(scope, id)?;
        }

        let result = registry.run(
            &command.task.key,
            evaluator,
            scope,
            command.inputs.clone(),
        )?;
        self.print_result(command, &result);
        Ok(())
    }

    fn print_result(&self, command: &Command, result: &TaskResult) {
        match self.machine_readable_output {
            Some(OutputFormat::Shell) => println!("{}", result.to_shell_line()),
            Some(OutputFormat::Json) => println!("{}", result.to_json_line(&command.task.to_string())),
            None => {
                let task_label = command.task.to_string();
                println!("{} {}", task_label.as_str().cyan().bold(), "=>".dimmed());
                let pretty = result.to_pretty();
                if !pretty.is_empty() {
                    println!("{pretty}");
                }
            }
        }
    }

    /// Line-oriented prompt loop for `--interactive` without queries.
    /// Unlike positional queries, a failed line reports and continues.
    fn prompt_loop(&self, evaluator: &Evaluator, registry: &TaskRegistry) -> Result<()> {
        let stdin = std::io::stdin();
        loop {
            eprint!("{} ", "kiln>".green().bold());
            let _ = std::io::stderr().flush();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                return Ok(());
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "exit" || line == "quit" {
                return Ok(());
            }
            let outcome = query::parse(line).map_err(anyhow::Error::from).and_then(|parsed| {
                for command in &parsed.commands {
                    self.run_command(evaluator, registry, command)?;
                }
                Ok(())
            });
            if let Err(error) = outcome {
                crate::core::user_friendly_error(error).display();
            }
        }
    }
}

fn print_available_tasks(registry: &TaskRegistry) {
    println!("{}", "Available task keys:".bold());
    for (name, description) in registry.descriptions() {
        println!("  {}  {}", name.as_str().cyan(), description.as_str().dimmed());
    }
    println!("\nInvoke as: kiln '[project/][config:]*key [input] [key=input]'");
}

fn stdin_prompter(input_key: &str, prompt: &str) -> Option<String> {
    eprint!("{} ({}): ", prompt.bold(), input_key.cyan());
    let _ = std::io::stderr().flush();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
    }
}
