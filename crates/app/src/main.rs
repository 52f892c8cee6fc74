mod config;
mod console;
mod seed;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use services::{AppServices, Clock, Inbound, LearnerReport, MessageOverrides, Messages};
use trainer_core::model::{BranchId, ChannelAddress, LearnerId, ProgressId};

use crate::config::{TrainerConfig, load_config, normalize_sqlite_url, prepare_sqlite_file};
use crate::console::ConsoleTransport;

#[derive(Parser)]
#[command(
    name = "trainer",
    version,
    about = "Chat-driven staff training: curriculum, quizzes and progress reports"
)]
struct Cli {
    /// Path to a TOML config file (defaults to ./trainer.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database URL, overriding the config file and TRAINER_DB_URL.
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Talk to the trainer from the terminal as one chat channel.
    Chat {
        #[arg(long, default_value = "console")]
        channel: String,
    },
    /// Load the demo curriculum and learners into a branch.
    Seed {
        #[arg(long)]
        branch: Option<u64>,
    },
    /// Show learner progress for a branch or a single learner.
    Report {
        #[arg(long, conflicts_with = "learner")]
        branch: Option<u64>,
        #[arg(long)]
        learner: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Record the staff verdict on a topic's open answers.
    Review {
        /// Progress record id, as shown by `report`.
        #[arg(long)]
        progress: u64,
        #[arg(long, value_enum)]
        verdict: Verdict,
    },
    /// Deactivate a learner; their channel stops being served.
    Deactivate {
        #[arg(long)]
        learner: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Verdict {
    Passed,
    Failed,
    Pending,
}

impl Verdict {
    fn reviewed(self) -> Option<bool> {
        match self {
            Verdict::Passed => Some(true),
            Verdict::Failed => Some(false),
            Verdict::Pending => None,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli, config).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli, mut config: TrainerConfig) -> Result<()> {
    if let Some(db) = cli.db {
        config.database_url = normalize_sqlite_url(db);
    }
    let app = open_services(&config).await?;

    match cli.command {
        Command::Chat { channel } => chat(&app, &channel).await,
        Command::Seed { branch } => {
            let branch = BranchId::new(branch.unwrap_or(config.default_branch));
            let summary = seed::seed_branch(app.storage(), branch).await?;
            println!(
                "Seeded branch {branch}: {} topics, {} quizzes",
                summary.topics, summary.quizzes
            );
            for learner in &summary.learners {
                let note = if learner.created { "" } else { " (existing)" };
                println!("  #{} {}: {}{note}", learner.id, learner.name, learner.token);
            }
            Ok(())
        }
        Command::Report {
            branch,
            learner,
            json,
        } => {
            let reports = match learner {
                Some(id) => vec![
                    app.reports()
                        .learner_report(LearnerId::new(id))
                        .await
                        .with_context(|| format!("loading report for learner {id}"))?,
                ],
                None => {
                    let branch = BranchId::new(branch.unwrap_or(config.default_branch));
                    app.reports()
                        .branch_report(branch)
                        .await
                        .with_context(|| format!("loading report for branch {branch}"))?
                }
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                print_reports(&reports);
            }
            Ok(())
        }
        Command::Review { progress, verdict } => {
            app.reports()
                .set_review_status(ProgressId::new(progress), verdict.reviewed())
                .await
                .with_context(|| format!("updating review of progress {progress}"))?;
            println!("Review of progress {progress} updated.");
            Ok(())
        }
        Command::Deactivate { learner } => {
            app.controller()
                .deactivate(LearnerId::new(learner))
                .await
                .with_context(|| format!("deactivating learner {learner}"))?;
            println!("Learner {learner} deactivated.");
            Ok(())
        }
    }
}

async fn open_services(config: &TrainerConfig) -> Result<AppServices> {
    let (overrides, unknown) = MessageOverrides::from_pairs(config.messages.clone());
    for key in unknown {
        warn!(key = %key, "ignoring override for unknown message tag");
    }
    let messages = Messages::new(Arc::new(overrides));

    prepare_sqlite_file(&config.database_url)?;
    AppServices::new_sqlite(&config.database_url, Clock::system(), messages)
        .await
        .with_context(|| format!("opening {}", config.database_url))
}

/// Terminal chat: `/start` restarts, a number taps a button of the last
/// screen, `!tag` sends a raw action and anything else is sent as text.
async fn chat(app: &AppServices, channel: &str) -> Result<()> {
    let channel = ChannelAddress::new(channel).context("invalid channel address")?;
    let transport = ConsoleTransport::default();
    let dispatcher = app.dispatcher();

    println!("Type /start to begin, /quit to leave.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let line = line.trim();
        let inbound = match line {
            "" => continue,
            "/quit" => break,
            "/start" => Inbound::start(channel.clone()),
            _ if line.starts_with('!') => Inbound::action(channel.clone(), &line[1..]),
            _ => match line.parse::<usize>() {
                Ok(number) => match transport.button(number).await {
                    Some(tag) => Inbound::action(channel.clone(), tag),
                    None => {
                        println!("No button {number} on the last screen.");
                        continue;
                    }
                },
                Err(_) => Inbound::text(channel.clone(), line),
            },
        };

        if let Err(err) = dispatcher.handle(&inbound, &transport).await {
            error!(error = %err, "event could not be handled");
            println!("Something went wrong, please try again.");
        }
    }
    Ok(())
}

fn print_reports(reports: &[LearnerReport]) {
    if reports.is_empty() {
        println!("No learners.");
        return;
    }
    for report in reports {
        let status = if report.active { "active" } else { "inactive" };
        println!(
            "#{} {} ({status}), pending reviews: {}",
            report.learner_id, report.display_name, report.pending_reviews
        );
        for topic in &report.topics {
            let state = if topic.locked {
                "locked".to_string()
            } else if topic.finished {
                match topic.score {
                    Some(score) => {
                        format!("finished {}/{}", score.closed_score, score.closed_max)
                    }
                    None => "finished".to_string(),
                }
            } else if topic.theory_complete {
                "theory read".to_string()
            } else {
                "in progress".to_string()
            };
            let review = match topic.open_answers_reviewed {
                _ if !topic.awaiting_review() && topic.open_answers.is_empty() => "",
                Some(true) => ", review passed",
                Some(false) => ", review failed",
                None => ", awaiting review",
            };
            println!(
                "  [{}] {}: {state}{review}",
                topic.progress_id, topic.topic_name
            );
            for answer in &topic.open_answers {
                println!(
                    "      Q: {}\n      A: {}",
                    answer.question,
                    answer.answer.as_deref().unwrap_or("-")
                );
            }
        }
    }
}
