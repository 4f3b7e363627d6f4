use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use queue_client::archive::{create_submission_tar, create_submission_tar_from_path};
use queue_client::{
    callback_url, decode_verdict, CallbackReceiver, PollOptions, QueueClient, Settings,
    StateTracker, TaskStorage, VerdictResolver,
};

#[derive(Parser)]
#[command(name = "queue-client", version, about = "Grading queue client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a submission container from the grading-tests checkout
    MakeSubmission {
        problem: String,
        language: String,
        /// Program to submit; defaults to the problem's AC program
        #[arg(long)]
        code: Option<PathBuf>,
        #[arg(long, default_value = "std")]
        driver: String,
        #[arg(short, long, default_value = "submission.tar")]
        out: PathBuf,
    },
    /// Enqueue a submission container
    Submit {
        file: PathBuf,
        #[arg(long)]
        image_id: String,
        /// Task name; defaults to `test-<unix millis>`
        #[arg(long)]
        name: Option<String>,
        /// Listen for the result callback and print the verdict
        #[arg(long)]
        wait: bool,
    },
    /// Wait until a task completes
    Wait {
        task_id: String,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Print the verdict of a finished task, or of a local result archive
    Verdict {
        task_id: Option<String>,
        #[arg(long, conflicts_with = "task_id")]
        file: Option<PathBuf>,
    },
    /// Check that the queue is up
    Ping,
    /// Print the effective settings
    Settings,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("queue_client=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = Settings::load().context("Failed to load settings")?;

    match cli.command {
        Command::MakeSubmission {
            problem,
            language,
            code,
            driver,
            out,
        } => {
            let tests_dir = &settings.dirs.tests;
            let path = match code {
                Some(code) => create_submission_tar_from_path(
                    &code, tests_dir, &problem, &language, &driver, &out,
                ),
                None => create_submission_tar(tests_dir, &problem, &language, &driver, &out),
            }
            .with_context(|| format!("Failed to build submission for {}/{}", problem, language))?;
            println!("{}", path.display());
        }
        Command::Submit {
            file,
            image_id,
            name,
            wait,
        } => submit(&settings, file, image_id, name, wait).await?,
        Command::Wait {
            task_id,
            timeout_ms,
        } => {
            let client = QueueClient::new(&settings.queue)?;
            let tracker = StateTracker::with_options(client, PollOptions::from(&settings.polling));
            let timeout = timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| settings.polling.timeout());
            let task = tracker
                .wait_for_task_completed(&task_id, timeout)
                .await
                .with_context(|| format!("Task {} did not complete", task_id))?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        Command::Verdict { task_id, file } => {
            let verdict = match (task_id, file) {
                (_, Some(file)) => {
                    let bytes = std::fs::read(&file)
                        .with_context(|| format!("Failed to read {}", file.display()))?;
                    decode_verdict(&bytes)?
                }
                (Some(task_id), None) => {
                    let resolver = VerdictResolver::new(
                        TaskStorage::from_settings(&settings),
                        PollOptions::from(&settings.polling),
                    );
                    resolver.resolve(&task_id, None).await?.verdict
                }
                (None, None) => anyhow::bail!("Either a task id or --file is required"),
            };
            println!("{}", verdict);
        }
        Command::Ping => {
            let client = QueueClient::new(&settings.queue)?;
            client
                .ping()
                .await
                .with_context(|| format!("Queue at {} is not responding", client.base_url()))?;
            println!("Queue at {} is up", client.base_url());
        }
        Command::Settings => println!("{}", settings.summary()),
    }

    Ok(())
}

async fn submit(
    settings: &Settings,
    file: PathBuf,
    image_id: String,
    name: Option<String>,
    wait: bool,
) -> Result<()> {
    let client = QueueClient::new(&settings.queue)?;
    let bytes = tokio::fs::read(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let name = name.unwrap_or_else(default_task_name);

    if !wait {
        let task = client.submit(&name, bytes, &image_id, None).await?;
        println!("{}", serde_json::to_string_pretty(&task)?);
        return Ok(());
    }

    let receiver = CallbackReceiver::new();
    let server = receiver
        .serve(&settings.callback.bind)
        .await
        .with_context(|| format!("Failed to bind callback receiver on {}", settings.callback.bind))?;
    let waiter = receiver.register(name.clone());
    let callback = callback_url(&settings.callback.public_url, &name);

    let task = client
        .submit(&name, bytes, &image_id, Some(&callback))
        .await?;
    info!("Waiting for verdict of task {}", task.id);

    let resolver = VerdictResolver::new(
        TaskStorage::from_settings(settings),
        PollOptions::from(&settings.polling),
    );
    let resolved = resolver.resolve(&task.id, Some(waiter)).await;
    server.stop().await;

    let resolved = resolved.with_context(|| format!("No verdict for task {}", task.id))?;
    println!("{} {}", task.id, resolved.verdict);
    Ok(())
}

fn default_task_name() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("test-{}", millis)
}
