use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use sdc_forms::FormConfig;

use super::{FormSource, build_form, print_json};

#[derive(Args, Debug, Clone)]
pub struct ResponseArgs {
    /// Questionnaire resource (JSON)
    #[arg(value_name = "questionnaire.json")]
    pub questionnaire: PathBuf,

    #[command(flatten)]
    pub source: FormSource,

    /// Print what expressions see (every node, disabled ones included)
    #[arg(long = "expression-context")]
    pub expression_context: bool,
}

pub fn run(args: ResponseArgs, config: FormConfig) -> Result<()> {
    let form = build_form(&args.questionnaire, &args.source, config)?;
    if args.expression_context {
        print_json(&form.expression_response())
    } else {
        print_json(&form.response())
    }
}
