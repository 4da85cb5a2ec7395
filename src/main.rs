mod config;
mod dialogue;
mod ort;
mod pipeline;
mod slots;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::GeneratorConfig;
use crate::dialogue::{run_chat, Session};
use crate::pipeline::lyrics::{build_prompt, GenerationRequest, LyricGenerator};
use crate::slots::{GenreMatching, SlotName, SlotTracker};

#[derive(Parser)]
#[command(name = "lyricsmith")]
#[command(about = "Guided lyric writer backed by a local ONNX causal language model", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ModelArgs {
    /// Directory holding tokenizer.json, io_contract_lm.json and the ONNX graphs.
    #[arg(long, default_value = "models/lyrics-gpt2")]
    model_dir: PathBuf,
    /// JSON file overriding sampling parameters.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct AttributeArgs {
    #[arg(long)]
    genre: Option<String>,
    #[arg(long)]
    topic: Option<String>,
    #[arg(long)]
    emotion: Option<String>,
    #[arg(long)]
    length: Option<i64>,
    /// Match genre aliases on word boundaries instead of anywhere in the answer.
    #[arg(long, default_value_t = false)]
    whole_word_genres: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive question-and-answer session on stdin/stdout.
    Chat {
        #[command(flatten)]
        model: ModelArgs,
        #[arg(long, default_value_t = false)]
        whole_word_genres: bool,
    },
    /// Validate the given attributes and write one set of lyrics.
    Generate {
        #[command(flatten)]
        model: ModelArgs,
        #[command(flatten)]
        attributes: AttributeArgs,
    },
    /// Print the prompt that would be sent to the model.
    Prompt {
        #[command(flatten)]
        attributes: AttributeArgs,
    },
}

fn genre_matching(whole_word: bool) -> GenreMatching {
    if whole_word {
        GenreMatching::WholeWord
    } else {
        GenreMatching::Substring
    }
}

fn load_config(path: Option<&Path>) -> Result<GeneratorConfig> {
    match path {
        Some(path) => {
            info!("Loading generator config from {}", path.display());
            GeneratorConfig::from_path(path)
        }
        None => Ok(GeneratorConfig::default()),
    }
}

/// Runs every provided attribute through the slot rules. Missing ones are
/// left unset and fall back to generation defaults.
fn tracker_from_args(args: &AttributeArgs) -> Result<SlotTracker> {
    let mut tracker = SlotTracker::with_genre_matching(genre_matching(args.whole_word_genres));
    let text_slots = [("genre", &args.genre), ("topic", &args.topic), ("emotion", &args.emotion)];
    for (name, value) in text_slots {
        if let Some(value) = value {
            tracker
                .update_slot_named(name, value.as_str())
                .with_context(|| format!("--{name}"))?;
        }
    }
    if let Some(length) = args.length {
        tracker.update_slot(SlotName::Length, length).context("--length")?;
    }
    Ok(tracker)
}

fn cmd_chat(model: ModelArgs, whole_word_genres: bool) -> Result<()> {
    let config = load_config(model.config.as_deref())?;
    let mut generator = LyricGenerator::load(&model.model_dir, config)?;
    let mut session = Session::new(genre_matching(whole_word_genres));
    let stdin = io::stdin();
    run_chat(stdin.lock(), io::stdout(), &mut session, &mut generator)
}

fn cmd_generate(model: ModelArgs, attributes: AttributeArgs) -> Result<()> {
    let tracker = tracker_from_args(&attributes)?;
    if let Some(missing) = tracker.next_unfilled_slot() {
        anyhow::bail!("--{missing} is required");
    }
    let config = load_config(model.config.as_deref())?;
    let mut generator = LyricGenerator::load(&model.model_dir, config)?;
    let request = GenerationRequest::from(tracker.slots());
    let generation = generator.generate_with_stats(&request)?;
    info!(
        prompt_tokens = generation.prompt_tokens,
        new_tokens = generation.new_tokens,
        max_new_tokens = generation.max_new_tokens,
        "generation finished"
    );
    println!("{}", generation.lyrics);
    Ok(())
}

fn cmd_prompt(attributes: AttributeArgs) -> Result<()> {
    let tracker = tracker_from_args(&attributes)?;
    print!("{}", build_prompt(&GenerationRequest::from(tracker.slots())));
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("install tracing subscriber")?;

    let _ = ::ort::init().commit();

    let cli = Cli::parse();
    match cli.command {
        Commands::Chat {
            model,
            whole_word_genres,
        } => cmd_chat(model, whole_word_genres),
        Commands::Generate { model, attributes } => cmd_generate(model, attributes),
        Commands::Prompt { attributes } => cmd_prompt(attributes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attributes() -> AttributeArgs {
        AttributeArgs {
            genre: None,
            topic: None,
            emotion: None,
            length: None,
            whole_word_genres: false,
        }
    }

    #[test]
    fn cli_parses_generate_arguments() {
        let cli = Cli::try_parse_from([
            "lyricsmith",
            "generate",
            "--model-dir",
            "m",
            "--genre",
            "rap",
            "--topic",
            "Street & Conflict",
            "--emotion",
            "anger",
            "--length",
            "300",
        ])
        .unwrap();
        match cli.command {
            Commands::Generate { model, attributes } => {
                assert_eq!(model.model_dir, PathBuf::from("m"));
                assert_eq!(attributes.length, Some(300));
                assert_eq!(attributes.topic.as_deref(), Some("Street & Conflict"));
            }
            _ => panic!("expected generate"),
        }
    }

    #[test]
    fn tracker_from_args_validates_each_value() {
        let mut args = attributes();
        args.genre = Some("hip-hop".to_string());
        args.length = Some(1200);
        let tracker = tracker_from_args(&args).unwrap();
        assert_eq!(tracker.next_unfilled_slot(), Some(SlotName::Topic));

        args.length = Some(1201);
        let err = tracker_from_args(&args).unwrap_err();
        assert!(format!("{err:#}").starts_with("--length: Invalid length: 1201."));
    }

    #[test]
    fn whole_word_flag_changes_genre_matching() {
        let mut args = attributes();
        args.genre = Some("unpopular".to_string());
        assert!(tracker_from_args(&args).is_ok());
        args.whole_word_genres = true;
        assert!(tracker_from_args(&args).is_err());
    }
}
