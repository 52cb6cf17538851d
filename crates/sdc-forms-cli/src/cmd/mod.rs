use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use sdc_forms::{Form, FormConfig, Questionnaire, QuestionnaireResponse};
use serde::de::DeserializeOwned;
use tracing::debug;

pub mod response;
pub mod schema;
pub mod validate;

/// Inputs shared by the commands that build a form.
#[derive(Args, Debug, Clone)]
pub struct FormSource {
    /// Stored response to seed the form with
    #[arg(long, value_name = "response.json")]
    pub response: Option<PathBuf>,

    /// Expand answer value sets over HTTP before evaluating
    #[arg(long)]
    pub expand: bool,
}

pub fn load_config(path: Option<&Path>) -> Result<FormConfig> {
    let Some(path) = path else {
        return Ok(FormConfig::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
}

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {what} {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid {what} {}", path.display()))
}

pub fn build_form(questionnaire: &Path, source: &FormSource, config: FormConfig) -> Result<Form> {
    let value = read_json(questionnaire, "questionnaire")?;
    let questionnaire = Questionnaire::from_json(value)
        .with_context(|| format!("invalid questionnaire {}", questionnaire.display()))?;
    let mut builder = Form::builder(questionnaire).with_config(config);
    if let Some(path) = &source.response {
        let response: QuestionnaireResponse = read_json(path, "response")?;
        builder = builder.with_response(response);
    }
    let form = builder.build().context("failed to build form")?;
    debug!(nodes = form.descendants().len(), "form loaded");

    if source.expand {
        expand(&form)?;
    }
    Ok(form)
}

#[cfg(feature = "http")]
fn expand(form: &Form) -> Result<()> {
    use sdc_forms::{HttpTerminologyClient, ValueSetCache};

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let cache = ValueSetCache::new(HttpTerminologyClient::default());
    let failures = runtime.block_on(form.expand_value_sets(&cache));
    for failure in failures {
        tracing::warn!(error = %failure, "value set not expanded");
    }
    Ok(())
}

#[cfg(not(feature = "http"))]
fn expand(_form: &Form) -> Result<()> {
    anyhow::bail!("--expand needs a build with the `http` feature")
}

pub fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to encode output")?;
    println!("{text}");
    Ok(())
}
