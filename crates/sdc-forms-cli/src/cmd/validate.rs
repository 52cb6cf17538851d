use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use sdc_forms::{FormConfig, Issue};
use tracing::info;

use super::{FormSource, build_form, print_json};

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    /// Questionnaire resource (JSON)
    #[arg(value_name = "questionnaire.json")]
    pub questionnaire: PathBuf,

    #[command(flatten)]
    pub source: FormSource,

    /// Print the issues as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

fn render(issue: &Issue) -> String {
    let severity = format!("{:?}", issue.severity).to_lowercase();
    match &issue.expression {
        Some(token) => format!("{severity:<8} {token}: {}", issue.diagnostics),
        None => format!("{severity:<8} {}", issue.diagnostics),
    }
}

/// Exits with status 1 when a blocking issue remains.
pub fn run(args: ValidateArgs, config: FormConfig) -> Result<ExitCode> {
    let form = build_form(&args.questionnaire, &args.source, config)?;
    let valid = form.validate_all();
    let issues = form.all_issues();
    info!(valid, issues = issues.len(), "validation finished");

    if args.json {
        print_json(&issues)?;
    } else if issues.is_empty() {
        println!("valid");
    } else {
        for issue in &issues {
            println!("{}", render(issue));
        }
    }
    Ok(if valid { ExitCode::SUCCESS } else { ExitCode::from(1) })
}
