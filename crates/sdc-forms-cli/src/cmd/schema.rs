use anyhow::Result;
use clap::{Args, ValueEnum};
use schemars::schema_for;
use sdc_forms::{FormConfig, Questionnaire, QuestionnaireResponse};

use super::print_json;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaTarget {
    #[default]
    Questionnaire,
    Response,
    Config,
}

#[derive(Args, Debug, Clone)]
pub struct SchemaArgs {
    #[arg(value_enum, default_value_t)]
    pub target: SchemaTarget,
}

pub fn run(args: SchemaArgs) -> Result<()> {
    let schema = match args.target {
        SchemaTarget::Questionnaire => schema_for!(Questionnaire),
        SchemaTarget::Response => schema_for!(QuestionnaireResponse),
        SchemaTarget::Config => schema_for!(FormConfig),
    };
    print_json(&schema)
}
