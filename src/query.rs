//! `cqa query`: ask a question against the ingested documents.
//!
//! The question is either given directly or picked from `[presets]` with
//! `--preset`. `--dry-run` stops after context assembly and prints the
//! prompt that would be sent, without calling the generator. `--json`
//! prints the full [`Answer`] (or [`QueryPlan`] for a dry run) instead of the
//! human-readable form.

use anyhow::{bail, Result};

use context_qa_core::qa::{Answer, QueryPlan, QueryRequest};

use crate::app::{App, IndexLoad};
use crate::config::Config;

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub k: Option<usize>,
    pub template: Option<String>,
    pub preset: Option<String>,
    pub dry_run: bool,
    pub json: bool,
}

pub async fn run_query(config: &Config, question: Option<String>, options: QueryOptions) -> Result<()> {
    let question = resolve_question(config, question, options.preset.as_deref())?;
    let mut request = QueryRequest::new(question);
    request.k = options.k;
    request.template = options.template.clone();

    let app = App::open(config, IndexLoad::Restore).await?;
    let result = if options.dry_run {
        app.pipeline
            .plan(&request)
            .await
            .map(|plan| print_plan(&plan, options.json))
    } else {
        app.pipeline
            .answer(&request)
            .await
            .map(|answer| print_answer(&answer, options.json))
    };
    app.close().await;
    result??;
    Ok(())
}

/// Pick the question text from the argument or a named preset.
pub fn resolve_question(
    config: &Config,
    question: Option<String>,
    preset: Option<&str>,
) -> Result<String> {
    match (question, preset) {
        (Some(_), Some(_)) => bail!("Give either a question or --preset, not both"),
        (Some(q), None) => Ok(q),
        (None, Some(name)) => match config.presets.get(name) {
            Some(q) => Ok(q.clone()),
            None => {
                let known: Vec<&str> = config.presets.keys().map(String::as_str).collect();
                bail!(
                    "Unknown preset: '{}'. Available: {}",
                    name,
                    if known.is_empty() {
                        "(none configured)".to_string()
                    } else {
                        known.join(", ")
                    }
                )
            }
        },
        (None, None) => bail!("A question or --preset is required"),
    }
}

fn print_answer(answer: &Answer, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(answer)?);
        return Ok(());
    }

    println!("{}", answer.answer);
    println!();
    if answer.passages.is_empty() {
        println!("Sources: none");
        return Ok(());
    }
    println!("Sources:");
    for (i, passage) in answer.passages.iter().enumerate() {
        println!(
            "  {}. [{:.2}] {}{}",
            i + 1,
            passage.score,
            passage.label,
            if passage.truncated { " (truncated)" } else { "" }
        );
    }
    Ok(())
}

fn print_plan(plan: &QueryPlan, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(plan)?);
        return Ok(());
    }

    println!("template: {}", plan.template);
    println!("retrieved: {}", plan.retrieved.len());
    for (i, passage) in plan.retrieved.iter().enumerate() {
        println!("{}. [{:.2}] {}", i + 1, passage.score, passage.label);
        println!(
            "    excerpt: \"{}\"",
            excerpt(&passage.chunk.text, 120).replace('\n', " ").trim()
        );
    }
    println!();

    match &plan.context {
        Some(context) => {
            println!(
                "--- Prompt ({} passages, {} / {} context chars) ---",
                context.passages.len(),
                context.char_len(),
                context.budget
            );
            println!("{}", context.prompt);
        }
        None => println!("No relevant passages; the no-context response would be returned."),
    }
    Ok(())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    fn config() -> Config {
        parse_config(
            r#"
[db]
path = "./data/cqa.sqlite"

[presets]
"Summary" = "Provide a professional summary of this candidate."
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_resolve_question() {
        let config = config();
        assert_eq!(
            resolve_question(&config, Some("Who?".into()), None).unwrap(),
            "Who?"
        );
        assert!(resolve_question(&config, None, Some("Summary"))
            .unwrap()
            .starts_with("Provide a professional summary"));
        assert!(resolve_question(&config, None, None).is_err());
        assert!(resolve_question(&config, Some("Who?".into()), Some("Summary")).is_err());

        let err = resolve_question(&config, None, Some("Nope")).unwrap_err();
        assert!(err.to_string().contains("Available: Summary"));
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("héllo wörld", 5), "héllo...");
        assert_eq!(excerpt("short", 10), "short");
    }
}
