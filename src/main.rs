use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use scriptgate::io::{format_approval_status, format_draft_details, format_draft_table, write_script};
use scriptgate::{
    App, DraftStatus, Outcome, ProcessOptions, Settings, TicketOutcome, parse_transcript_file,
    server,
};

#[derive(Parser)]
#[command(name = "scriptgate")]
#[command(author, version, about = "Generate QA test scripts from voice transcripts", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and working directories
    Init,

    /// Generate a test script from a transcript file
    Generate {
        /// Transcript file (.txt, .json, .vtt, .srt)
        transcript: PathBuf,

        /// Additional context for generation
        #[arg(short, long)]
        context: Option<String>,

        /// Also write the script body to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip the approval workflow
        #[arg(long)]
        auto_approve: bool,

        /// File a ServiceNow story immediately when approval is skipped
        #[arg(long)]
        create_story: bool,
    },

    /// Generate scripts for several transcripts into the output directory without storing them
    Batch {
        transcripts: Vec<PathBuf>,

        #[arg(short, long)]
        context: Option<String>,
    },

    /// List test scripts
    List {
        /// Filter by status (pending, approved, rejected)
        #[arg(short, long)]
        status: Option<DraftStatus>,

        /// Number of records to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show one test script
    View { id: i64 },

    /// Approve or reject a test script directly
    Approve {
        id: i64,

        #[arg(long)]
        reject: bool,

        /// Approval note or rejection reason
        #[arg(short, long)]
        note: Option<String>,

        /// Recorded approver
        #[arg(long, default_value = "cli")]
        approver: String,
    },

    /// Issue an approval token and email it to the product owner
    RequestApproval {
        id: i64,

        #[arg(long, default_value = "cli")]
        requester: String,
    },

    /// Show approval status and request history
    Status { id: i64 },

    /// Parse a transcript and print a summary
    Inspect { transcript: PathBuf },

    /// Validate configuration
    ConfigCheck,

    /// File a ServiceNow story for an approved test script
    FileStory { id: i64 },

    /// Fetch the linked story, optionally moving it to a new state first
    Story {
        id: i64,

        #[arg(long)]
        state: Option<String>,
    },

    /// Create one ServiceNow test record per scenario of a filed script
    TestCases { id: i64 },

    /// Attach a file to the linked story
    Attach { id: i64, file: PathBuf },

    /// Run the HTTP server
    Serve {
        /// Listen address, overriding SERVER_ADDR
        #[arg(long)]
        addr: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let settings = Settings::from_env();
    settings
        .create_directories()
        .context("Failed to create working directories")?;
    let app = App::from_settings(settings).context("Failed to initialise application")?;

    run(Arc::new(app), cli.command).await
}

fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(app: Arc<App>, command: Commands) -> Result<()> {
    match command {
        Commands::Init => {
            println!(
                "Database ready at {}",
                app.settings().database_path().display()
            );
        }
        Commands::Generate {
            transcript,
            context,
            output,
            auto_approve,
            create_story,
        } => {
            let options = ProcessOptions {
                context,
                auto_approve,
                create_story,
            };
            generate(&app, &transcript, output.as_deref(), &options).await?;
        }
        Commands::Batch {
            transcripts,
            context,
        } => batch(&app, &transcripts, context.as_deref()).await?,
        Commands::List { status, limit } => {
            let drafts = app.store().list_drafts(status, limit)?;
            print!("{}", format_draft_table(&drafts));
        }
        Commands::View { id } => {
            print!("{}", format_draft_details(&app.store().draft(id)?));
        }
        Commands::Approve {
            id,
            reject,
            note,
            approver,
        } => {
            let resolution = app
                .workflow()
                .decide(id, !reject, &approver, note.as_deref())
                .await
                .with_context(|| format!("Failed to update test script {}", id))?;
            println!("Test script {} {}", id, resolution.decision);
            if let Some(ticket) = &resolution.ticket {
                print_ticket(ticket);
            }
        }
        Commands::RequestApproval { id, requester } => {
            let issued = app.workflow().request(id, &requester).await?;
            println!("Approval request {} created", issued.approval_request_id);
            println!("  Token:   {}", issued.approval_token);
            println!("  Expires: {}", issued.expires_at.to_rfc3339());
            println!(
                "  Email:   {}",
                if issued.email_sent { "sent" } else { "not sent" }
            );
        }
        Commands::Status { id } => {
            print!("{}", format_approval_status(&app.workflow().status(id)?));
        }
        Commands::FileStory { id } => print_ticket(&app.workflow().file_ticket(id).await?),
        Commands::Story { id, state } => {
            if let Some(state) = state {
                print_call(&app.update_story_state(id, &state).await?)?;
            }
            print_call(&app.story(id).await?)?;
        }
        Commands::TestCases { id } => {
            let report = app.create_test_cases(id).await?;
            for case in &report.created_tests {
                match (&case.test_id, &case.error) {
                    (_, Some(error)) => println!("  x {}: {}", case.test_name, error),
                    (id, None) => println!("  + {} ({})", case.test_name, id.as_deref().unwrap_or("-")),
                }
            }
            if !report.success {
                bail!("No test cases were created");
            }
        }
        Commands::Attach { id, file } => print_call(&app.attach_to_story(id, &file).await?)?,
        Commands::Inspect { transcript } => inspect(&transcript)?,
        Commands::ConfigCheck => config_check(app.settings())?,
        Commands::Serve { addr } => {
            let addr = match addr {
                Some(addr) => addr
                    .parse()
                    .with_context(|| format!("Invalid listen address {}", addr))?,
                None => app.settings().socket_addr()?,
            };
            server::serve(app.clone(), addr)
                .await
                .context("HTTP server failed")?;
        }
    }
    Ok(())
}

async fn generate(
    app: &App,
    transcript: &Path,
    output: Option<&Path>,
    options: &ProcessOptions,
) -> Result<()> {
    info!("Reading transcript {:?}", transcript);
    let report = app
        .process_transcript(transcript, options)
        .await
        .with_context(|| format!("Failed to process {:?}", transcript))?;

    println!("Test script {} generated: {}", report.draft.id, report.draft.title);
    println!("  Format: {}", report.draft.format);
    println!("  Status: {}", report.draft.status);
    println!();
    println!("{}", report.draft.content);

    if let Some(path) = output {
        write_script(path, &report.draft.content)?;
        println!("\nTest script saved to {}", path.display());
    }

    if let Some(issued) = &report.approval {
        println!("\nApproval required");
        if issued.email_sent {
            println!("  Approval request emailed");
        } else {
            println!("  Email not sent; share the token directly");
        }
        println!("  Token: {}", issued.approval_token);
    }

    if let Some(ticket) = &report.ticket {
        print_ticket(ticket);
    }
    Ok(())
}

async fn batch(app: &App, transcripts: &[PathBuf], context: Option<&str>) -> Result<()> {
    let generator = app.generator()?;
    let entries = generator.generate_batch(transcripts, context).await;
    let mut failed = 0;

    for entry in entries {
        match entry.outcome {
            Ok(draft) => {
                let stem = entry
                    .path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "script".to_string());
                let target = app
                    .settings()
                    .output_dir
                    .join(format!("{}.{}", stem, draft.format.file_extension()));
                write_script(&target, &draft.content)?;
                println!("{} -> {} ({})", entry.path.display(), target.display(), draft.title);
            }
            Err(e) => {
                failed += 1;
                println!("{} failed: {}", entry.path.display(), e);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} transcripts failed", failed, transcripts.len());
    }
    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let parsed =
        parse_transcript_file(path).with_context(|| format!("Failed to parse {:?}", path))?;
    println!("{}", parsed.summary());
    Ok(())
}

fn config_check(settings: &Settings) -> Result<()> {
    println!("Configuration");
    println!("=============");
    println!("App Name:          {}", settings.app_name);
    println!("AI Provider:       {}", settings.ai_provider);
    println!("AI Model:          {}", settings.ai_model);
    println!("Test Format:       {}", settings.test_script_format);
    println!("Approval Required: {}", settings.approval_required);
    println!("Auto-create Story: {}", settings.auto_create_story_on_approval);
    println!(
        "ServiceNow:        {}",
        settings.servicenow_instance.as_deref().unwrap_or("(not set)")
    );
    println!(
        "Product Owner:     {}",
        settings.product_owner_email.as_deref().unwrap_or("(not set)")
    );
    println!();

    settings
        .require_valid()
        .context("Configuration check failed")?;
    println!("Configuration is valid");
    Ok(())
}

fn print_ticket(ticket: &TicketOutcome) {
    match ticket {
        Outcome::Success(story) => {
            println!(
                "Story created: {}",
                story.story_number.as_deref().unwrap_or(&story.story_id)
            );
            println!("  Link: {}", story.story_link);
        }
        Outcome::Failed { error } => println!("Story not created: {}", error),
    }
}

fn print_call(outcome: &Outcome<serde_json::Value>) -> Result<()> {
    match outcome {
        Outcome::Success(record) => println!("{}", serde_json::to_string_pretty(record)?),
        Outcome::Failed { error } => bail!("ServiceNow call failed: {}", error),
    }
    Ok(())
}
