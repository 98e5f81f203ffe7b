//! `fm` - offline Fork/Merge tooling
//!
//! Merges recorded branch results, fingerprints output schemas, and estimates
//! whether a warmup call pays for itself.

mod commands;

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use commands::StrategySource;
use fm_fork::WarmupKind;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the log filter
const LOG_ENV: &str = "FM_LOG";

fn cli() -> Command {
    Command::new("fm")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Fork/Merge offline tooling")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Log at debug level"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("merge")
                .about("Merge branch results from a JSON file and print the merge result")
                .arg(
                    Arg::new("input")
                        .long("input")
                        .short('i')
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON array of {value, confidence, origin?, trace_id?}"),
                )
                .arg(
                    Arg::new("strategy")
                        .long("strategy")
                        .short('s')
                        .default_value("weighted-vote")
                        .conflicts_with("spec")
                        .help("Registered strategy name"),
                )
                .arg(
                    Arg::new("spec")
                        .long("spec")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML or JSON strategy description"),
                ),
        )
        .subcommand(
            Command::new("signature")
                .about("Fingerprint output schemas and report conflicts between them")
                .arg(
                    Arg::new("files")
                        .required(true)
                        .num_args(1..)
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON schema files, or sample values with --sample"),
                )
                .arg(
                    Arg::new("sample")
                        .long("sample")
                        .action(ArgAction::SetTrue)
                        .help("Treat files as sample values and infer their shape"),
                ),
        )
        .subcommand(
            Command::new("estimate")
                .about("Estimate whether warming up a shared prefix pays off")
                .arg(
                    Arg::new("prefix-tokens")
                        .long("prefix-tokens")
                        .value_parser(value_parser!(u64))
                        .help("Tokens in the shared prefix"),
                )
                .arg(
                    Arg::new("branches")
                        .long("branches")
                        .value_parser(value_parser!(usize))
                        .help("Branches in the fan-out"),
                )
                .arg(
                    Arg::new("mode")
                        .long("mode")
                        .value_parser(["explicit", "first-branch"])
                        .default_value("explicit")
                        .help("Warmup mode: a separate primer, or branch 0 as the primer"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("Fork config file whose [warmup_cost] table seeds the estimate"),
                ),
        )
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(matches: &ArgMatches) -> anyhow::Result<String> {
    match matches.subcommand() {
        Some(("merge", args)) => {
            let input = args
                .get_one::<PathBuf>("input")
                .context("--input is required")?;
            let source = match args.get_one::<PathBuf>("spec") {
                Some(path) => StrategySource::SpecFile(path.clone()),
                None => StrategySource::Named(
                    args.get_one::<String>("strategy")
                        .cloned()
                        .unwrap_or_else(|| "weighted-vote".to_string()),
                ),
            };
            commands::merge_file(input, &source)
        }
        Some(("signature", args)) => {
            let files: Vec<PathBuf> = args
                .get_many::<PathBuf>("files")
                .map(|files| files.cloned().collect())
                .unwrap_or_default();
            commands::signatures(&files, args.get_flag("sample"))
        }
        Some(("estimate", args)) => {
            let config = commands::estimate_config(
                args.get_one::<PathBuf>("config").map(PathBuf::as_path),
                args.get_one::<u64>("prefix-tokens").copied(),
                args.get_one::<usize>("branches").copied(),
            )?;
            let mode = match args.get_one::<String>("mode").map(String::as_str) {
                Some("first-branch") => WarmupKind::FirstBranch,
                _ => WarmupKind::Explicit,
            };
            Ok(commands::estimate(&config, mode))
        }
        Some((other, _)) => anyhow::bail!("unknown command '{other}'"),
        None => anyhow::bail!("no command given"),
    }
}

fn main() -> ExitCode {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("verbose"), matches.get_flag("json"));

    match run(&matches) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        cli().debug_assert();
    }

    #[test]
    fn strategy_and_spec_conflict() {
        let result = cli().try_get_matches_from([
            "fm", "merge", "--input", "r.json", "--strategy", "concat", "--spec", "s.toml",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let matches = cli()
            .try_get_matches_from(["fm", "estimate", "--prefix-tokens", "2048", "--json"])
            .unwrap();
        assert!(matches.get_flag("json"));
        let (_, args) = matches.subcommand().unwrap();
        assert_eq!(args.get_one::<u64>("prefix-tokens"), Some(&2048));
        assert_eq!(args.get_one::<String>("mode").map(String::as_str), Some("explicit"));
    }

    #[test]
    fn estimate_mode_is_checked() {
        assert!(cli().try_get_matches_from(["fm", "estimate", "--mode", "first-branch"]).is_ok());
        assert!(cli().try_get_matches_from(["fm", "estimate", "--mode", "none"]).is_err());
    }
}
