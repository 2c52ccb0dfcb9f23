//! `stockdesk config` subcommands.

use anyhow::Result;

use stockdesk::prompts::PromptLibrary;
use stockdesk::Config;

use super::ConfigAction;

pub(crate) fn cmd_config(action: ConfigAction, config: &Config) -> Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(&config.redacted())?);
        }
        ConfigAction::Check => {
            let mut problems = config.validate();
            problems.extend(prompt_problems(config));
            if problems.is_empty() {
                println!("Configuration OK.");
                return Ok(());
            }
            for problem in &problems {
                println!("  - {}", problem);
            }
            anyhow::bail!("{} configuration problem(s) found", problems.len());
        }
    }
    Ok(())
}

/// Load the prompt library, list it, and cross-check it against the
/// configured response schemas.
fn prompt_problems(config: &Config) -> Vec<String> {
    let dir = &config.gateway.prompts_dir;
    if !dir.exists() {
        // Already reported by Config::validate.
        return Vec::new();
    }
    let library = match PromptLibrary::load_dir(dir) {
        Ok(library) => library,
        Err(e) => return vec![format!("prompt templates failed to load: {}", e)],
    };
    if library.is_empty() {
        return vec![format!("no *.txt prompt templates in {}", dir.display())];
    }
    println!(
        "Prompt templates ({}): {}",
        library.len(),
        library.names().join(", ")
    );

    let mut missing: Vec<String> = config
        .gateway
        .schemas
        .keys()
        .filter(|request_type| !library.contains(request_type))
        .map(|request_type| {
            format!("gateway.schemas.{request_type} has no matching prompt template")
        })
        .collect();
    missing.sort();
    missing
}
