use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

use facefold::config::Config;
use facefold::db::{Database, Person, SuggestionStatus, WatchFolder};
use facefold::faces::{self, ClusteringSettings};
use facefold::lifecycle::{self, Acceptance, AssignTarget};
use facefold::logging::{self, LogTarget};
use facefold::pipeline::{Orchestrator, PipelineContext};
use facefold::scanner::FsMediaSource;
use facefold::tasks::WorkTarget;

#[derive(Parser)]
#[command(name = "facefold", version, about = "Face matching and person suggestions for your photo library")]
struct Cli {
    /// Path to config file (overrides FACEFOLD_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the library and watch folders, extract faces and generate suggestions
    Sync,
    /// Scan a single watch folder, then extract and suggest
    Scan {
        /// Watch folder ID
        folder_id: i64,
    },
    /// Run one suggestion pass over unassigned faces
    Cluster,
    /// List suggestions
    Suggestions {
        #[arg(short, long, value_enum)]
        status: Option<StatusArg>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Accept a pending suggestion
    Accept {
        id: i64,
        /// Name for the new person, when the suggestion proposes one
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Reject a pending suggestion
    Reject { id: i64 },
    /// Assign a face to a person by hand
    Assign {
        face_id: i64,
        /// Existing person ID
        #[arg(short, long, conflicts_with = "name")]
        person: Option<i64>,
        /// Name for a new person
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Manage people
    People {
        #[command(subcommand)]
        command: PeopleCommand,
    },
    /// Manage watch folders
    Folders {
        #[command(subcommand)]
        command: FolderCommand,
    },
}

#[derive(Subcommand)]
enum PeopleCommand {
    List,
    Create { name: String },
    Rename { id: i64, name: String },
    Delete { id: i64 },
    /// List the photos linked to a person
    Photos { id: i64 },
    /// Link a photo to a person
    Link { id: i64, photo_id: i64 },
    /// Remove a photo from a person
    Unlink { id: i64, photo_id: i64 },
}

#[derive(Subcommand)]
enum FolderCommand {
    List,
    Add { path: PathBuf },
    Remove { id: i64 },
    Enable { id: i64 },
    Disable { id: i64 },
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Pending,
    Accepted,
    Rejected,
}

impl From<StatusArg> for SuggestionStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Pending => SuggestionStatus::Pending,
            StatusArg::Accepted => SuggestionStatus::Accepted,
            StatusArg::Rejected => SuggestionStatus::Rejected,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(LogTarget::Stderr)?;

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let db = Arc::new(open_database(&config)?);

    match cli.command {
        Commands::Sync => run_pipeline(&config, db, WorkTarget::GlobalSync).await?,
        Commands::Scan { folder_id } => {
            run_pipeline(&config, db, WorkTarget::FolderScan { folder_id }).await?
        }
        Commands::Cluster => {
            let report = faces::run_clustering_pass(&db, &ClusteringSettings::from(&config.faces))?;
            println!(
                "Considered {} faces: {} suggestions created, {} without candidates, {} waiting, {} previously rejected",
                report.faces_considered,
                report.suggestions_created,
                report.without_candidates,
                report.deferred,
                report.suppressed
            );
        }
        Commands::Suggestions { status, json } => {
            let suggestions = lifecycle::list_suggestions(&db, status.map(Into::into))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&suggestions)?);
            } else if suggestions.is_empty() {
                println!("No suggestions");
            } else {
                println!("{:>6}  {:>6}  {:>8}  {:>6}  STATUS", "ID", "FACE", "PERSON", "SCORE");
                for s in suggestions {
                    let person = s
                        .suggested_person_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "new".to_string());
                    println!(
                        "{:>6}  {:>6}  {:>8}  {:>6.3}  {}",
                        s.id, s.face_id, person, s.similarity_score, s.status
                    );
                }
            }
        }
        Commands::Accept { id, name } => {
            let acceptance = lifecycle::accept(&db, id, name.as_deref())?;
            print_acceptance(&db, &acceptance)?;
        }
        Commands::Reject { id } => {
            lifecycle::reject(&db, id)?;
            println!("Rejected suggestion {}", id);
        }
        Commands::Assign { face_id, person, name } => {
            let target = match person {
                Some(person_id) => AssignTarget::Existing(person_id),
                None => AssignTarget::New(name),
            };
            let acceptance = lifecycle::assign_face(&db, face_id, target)?;
            print_acceptance(&db, &acceptance)?;
        }
        Commands::People { command } => people_command(&db, command)?,
        Commands::Folders { command } => folder_command(&db, command)?,
    }

    Ok(())
}

fn open_database(config: &Config) -> Result<Database> {
    let db = Database::open(&config.database.path)
        .with_context(|| format!("Failed to open database {:?}", config.database.path))?;
    db.initialize()?;
    Ok(db)
}

/// Run the pipeline in-process until the queue drains.
async fn run_pipeline(config: &Config, db: Arc<Database>, target: WorkTarget) -> Result<()> {
    let extractor = Arc::new(faces::load_extractor(&config.faces)?);
    let source = Arc::new(FsMediaSource::new(&config.library));
    let ctx = PipelineContext::new(Arc::clone(&db), source, Arc::clone(&extractor), config);

    let orchestrator = Orchestrator::start(ctx, &config.pipeline);
    orchestrator.enqueue(target);
    orchestrator.wait_idle().await;

    let failures = orchestrator.queue().failures();
    let failed_total = orchestrator.queue().failed_total();
    orchestrator.shutdown().await;
    extractor.close();

    let pending = lifecycle::list_suggestions(&db, Some(SuggestionStatus::Pending))?;
    println!("{} pending suggestions", pending.len());
    if failed_total > 0 {
        eprintln!("{} units failed:", failed_total);
        for record in &failures {
            eprintln!("  {}: {}", record.target, record.last_error.as_deref().unwrap_or("unknown error"));
        }
        if failed_total > failures.len() {
            eprintln!("  ... and {} more", failed_total - failures.len());
        }
    }
    Ok(())
}

fn print_acceptance(db: &Database, acceptance: &Acceptance) -> Result<()> {
    let people = lifecycle::list_people(db)?;
    let name = people
        .iter()
        .find(|p| p.id == acceptance.person_id)
        .map(|p| p.name.as_str())
        .unwrap_or("?");
    let created = if acceptance.person_created { " (new)" } else { "" };
    println!(
        "Face {} assigned to {} [{}]{}",
        acceptance.suggestion.face_id, name, acceptance.person_id, created
    );
    Ok(())
}

fn print_person(person: &Person) {
    println!(
        "{:>6}  {:<30}  {:>6} photos",
        person.id, person.name, person.photo_count
    );
}

fn print_folder(folder: &WatchFolder) {
    let state = if folder.is_enabled { "enabled" } else { "disabled" };
    println!("{:>6}  {:<8}  {}", folder.id, state, folder.path);
}

fn people_command(db: &Database, command: PeopleCommand) -> Result<()> {
    match command {
        PeopleCommand::List => {
            let people = lifecycle::list_people(db)?;
            if people.is_empty() {
                println!("No people");
            }
            for person in &people {
                print_person(person);
            }
        }
        PeopleCommand::Create { name } => print_person(&lifecycle::create_person(db, &name)?),
        PeopleCommand::Rename { id, name } => print_person(&lifecycle::rename_person(db, id, &name)?),
        PeopleCommand::Delete { id } => {
            lifecycle::delete_person(db, id)?;
            println!("Deleted person {}", id);
        }
        PeopleCommand::Photos { id } => {
            for photo in lifecycle::photos_for_person(db, id)? {
                println!("{:>6}  {}", photo.id, photo.uri);
            }
        }
        PeopleCommand::Link { id, photo_id } => {
            if lifecycle::link_photo(db, id, photo_id)? {
                println!("Linked photo {} to person {}", photo_id, id);
            } else {
                println!("Photo {} was already linked to person {}", photo_id, id);
            }
        }
        PeopleCommand::Unlink { id, photo_id } => {
            if lifecycle::unlink_photo(db, id, photo_id)? {
                println!("Unlinked photo {} from person {}", photo_id, id);
            } else {
                println!("Photo {} was not linked to person {}", photo_id, id);
            }
        }
    }
    Ok(())
}

fn folder_command(db: &Database, command: FolderCommand) -> Result<()> {
    match command {
        FolderCommand::List => {
            let folders = lifecycle::list_watch_folders(db)?;
            if folders.is_empty() {
                println!("No watch folders");
            }
            for folder in &folders {
                print_folder(folder);
            }
        }
        FolderCommand::Add { path } => {
            let path = std::fs::canonicalize(&path).with_context(|| format!("Cannot resolve {:?}", path))?;
            print_folder(&lifecycle::add_watch_folder(db, &path.to_string_lossy())?);
        }
        FolderCommand::Remove { id } => {
            let folder = lifecycle::remove_watch_folder(db, id)?;
            println!("Removed watch folder {}", folder.path);
        }
        FolderCommand::Enable { id } => print_folder(&lifecycle::set_watch_folder_enabled(db, id, true)?),
        FolderCommand::Disable { id } => print_folder(&lifecycle::set_watch_folder_enabled(db, id, false)?),
    }
    Ok(())
}
