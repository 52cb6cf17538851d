use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cmd::{self, response::ResponseArgs, schema::SchemaArgs, validate::ValidateArgs};

#[derive(Parser, Debug)]
#[command(
    name = "sdc-forms",
    about = "Load FHIR questionnaires, evaluate them and inspect their responses",
    version,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Engine settings (TOML)
    #[arg(long, value_name = "config.toml", global = true)]
    config: Option<PathBuf>,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the response a questionnaire produces
    Response(ResponseArgs),
    /// Validate a stored response as if submitting it
    Validate(ValidateArgs),
    /// Print the JSON schema of an input document
    Schema(SchemaArgs),
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("sdc_forms={level},sdc_forms_cli={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

pub fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = cmd::load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Response(args) => cmd::response::run(args, config).map(|()| ExitCode::SUCCESS),
        Commands::Validate(args) => cmd::validate::run(args, config),
        Commands::Schema(args) => cmd::schema::run(args).map(|()| ExitCode::SUCCESS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::schema::SchemaTarget;

    #[test]
    fn parses_response_subcommand() {
        let cli = Cli::try_parse_from([
            "sdc-forms",
            "-vv",
            "--config",
            "engine.toml",
            "response",
            "intake.json",
            "--response",
            "stored.json",
            "--expression-context",
        ])
        .expect("expected CLI to parse");
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("engine.toml")));
        match cli.command {
            Commands::Response(args) => {
                assert_eq!(args.questionnaire, PathBuf::from("intake.json"));
                assert_eq!(args.source.response, Some(PathBuf::from("stored.json")));
                assert!(args.expression_context);
            }
            _ => panic!("expected response args"),
        }
    }

    #[test]
    fn schema_target_defaults_to_questionnaire() {
        let cli = Cli::try_parse_from(["sdc-forms", "schema"]).expect("expected CLI to parse");
        match cli.command {
            Commands::Schema(args) => assert_eq!(args.target, SchemaTarget::Questionnaire),
            _ => panic!("expected schema args"),
        }
    }

    #[test]
    fn validate_requires_a_questionnaire() {
        assert!(Cli::try_parse_from(["sdc-forms", "validate"]).is_err());
    }
}
