use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tracing::level_filters::LevelFilter;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tutor_backend_core::api::server::{serve, AppState};
use tutor_backend_core::db::learning::{LearningStore, SharedLearningStore};
use tutor_backend_core::db::resolve_db_config;
use tutor_backend_core::settings::{load_tutor_settings_from_env, TutorSettings};
use tutor_backend_core::tutor::semantic::{EmbeddingSearch, HttpEmbedder, IndexReport};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    let rest = cli_args.iter().skip(1).cloned().collect::<Vec<_>>();
    match cli_args.first().map(String::as_str) {
        Some("issue-student-token") => run_issue_student_token_cli(rest),
        Some("seed-demo") => run_seed_demo_cli(rest).await,
        Some("index-lessons") => run_index_lessons_cli(rest).await,
        Some("serve") => run_serve(rest).await,
        Some("-h" | "--help") => {
            print_usage();
            Ok(())
        }
        Some(flag) if flag.starts_with("--") => run_serve(cli_args).await,
        None => run_serve(Vec::new()).await,
        Some(unknown) => Err(std::io::Error::other(format!(
            "Unknown command: {unknown}\n\nUse --help for usage."
        ))
        .into()),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct CommonCliArgs {
    app_root: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct IssueStudentTokenCliArgs {
    common: CommonCliArgs,
    student_id: String,
    label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct IndexLessonsCliArgs {
    common: CommonCliArgs,
    lesson_id: Option<String>,
}

fn parse_common_cli_args(args: &[String]) -> Result<CommonCliArgs, Box<dyn std::error::Error>> {
    let mut common = CommonCliArgs::default();
    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let needs_value = |idx: usize| -> Result<String, Box<dyn std::error::Error>> {
            let Some(value) = args.get(idx + 1) else {
                return Err(std::io::Error::other(format!("Missing value for {flag}")).into());
            };
            Ok(value.clone())
        };

        match flag {
            "--app-root" => {
                common.app_root = Some(PathBuf::from(needs_value(i)?));
                i += 2;
            }
            unknown => {
                return Err(std::io::Error::other(format!(
                    "Unknown argument: {unknown}\n\nUse --help for usage."
                ))
                .into());
            }
        }
    }
    Ok(common)
}

fn parse_issue_student_token_cli_args(
    args: &[String],
) -> Result<IssueStudentTokenCliArgs, Box<dyn std::error::Error>> {
    let mut common = CommonCliArgs::default();
    let mut student_id = None::<String>;
    let mut label = None::<String>;
    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let needs_value = |idx: usize| -> Result<String, Box<dyn std::error::Error>> {
            let Some(value) = args.get(idx + 1) else {
                return Err(std::io::Error::other(format!("Missing value for {flag}")).into());
            };
            Ok(value.clone())
        };

        match flag {
            "--student-id" => {
                student_id = Some(needs_value(i)?);
                i += 2;
            }
            "--label" => {
                label = Some(needs_value(i)?);
                i += 2;
            }
            "--app-root" => {
                common.app_root = Some(PathBuf::from(needs_value(i)?));
                i += 2;
            }
            unknown => {
                return Err(std::io::Error::other(format!(
                    "Unknown argument: {unknown}\n\nUse --help for usage."
                ))
                .into());
            }
        }
    }

    let student_id = student_id
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| std::io::Error::other("Missing required --student-id"))?;
    let label = label
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    Ok(IssueStudentTokenCliArgs {
        common,
        student_id,
        label,
    })
}

fn parse_index_lessons_cli_args(
    args: &[String],
) -> Result<IndexLessonsCliArgs, Box<dyn std::error::Error>> {
    let mut common = CommonCliArgs::default();
    let mut lesson_id = None::<String>;
    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let needs_value = |idx: usize| -> Result<String, Box<dyn std::error::Error>> {
            let Some(value) = args.get(idx + 1) else {
                return Err(std::io::Error::other(format!("Missing value for {flag}")).into());
            };
            Ok(value.clone())
        };

        match flag {
            "--lesson-id" => {
                lesson_id = Some(needs_value(i)?);
                i += 2;
            }
            "--app-root" => {
                common.app_root = Some(PathBuf::from(needs_value(i)?));
                i += 2;
            }
            unknown => {
                return Err(std::io::Error::other(format!(
                    "Unknown argument: {unknown}\n\nUse --help for usage."
                ))
                .into());
            }
        }
    }

    let lesson_id = lesson_id
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    Ok(IndexLessonsCliArgs { common, lesson_id })
}

fn resolve_app_root(common: &CommonCliArgs) -> Result<PathBuf, Box<dyn std::error::Error>> {
    match common.app_root.as_ref() {
        Some(root) => Ok(root.clone()),
        None => Ok(std::env::current_dir()?),
    }
}

fn open_store_for_cli(
    common: &CommonCliArgs,
) -> Result<(LearningStore, TutorSettings), Box<dyn std::error::Error>> {
    let app_root = resolve_app_root(common)?;
    let settings = load_tutor_settings_from_env(app_root.as_path())?;
    let db = resolve_db_config(app_root.as_path(), settings.db_path.as_deref());
    let store = LearningStore::new(db.app_db_path);
    store.initialize()?;
    Ok((store, settings))
}

async fn run_serve(args: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    let common = parse_common_cli_args(args.as_slice())?;
    let app_root = resolve_app_root(&common)?;
    let settings = load_tutor_settings_from_env(app_root.as_path())?;
    let addr: SocketAddr = settings.bind.parse()?;
    let state = AppState::from_settings(app_root.as_path(), &settings)?;
    serve(addr, state).await?;
    Ok(())
}

fn run_issue_student_token_cli(args: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_usage();
        return Ok(());
    }
    let parsed = parse_issue_student_token_cli_args(args.as_slice())?;
    let (store, _) = open_store_for_cli(&parsed.common)?;
    let issued = store.issue_access_token(parsed.student_id.as_str(), parsed.label.as_deref())?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "ok": true,
            "access_token": issued,
        }))?
    );
    Ok(())
}

async fn run_seed_demo_cli(args: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    let common = parse_common_cli_args(args.as_slice())?;
    let (store, settings) = open_store_for_cli(&common)?;
    let store: SharedLearningStore = Arc::new(store);
    let seed = store.seed_demo()?;
    let issued = store.issue_access_token(seed.student_id.as_str(), Some("demo"))?;
    let indexed = match index_lessons_with_settings(store, &settings, None).await {
        Ok(report) => report,
        Err(error) => {
            warn!(%error, "demo lessons were not indexed; search will use keywords");
            None
        }
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "ok": true,
            "seed": seed,
            "access_token": issued,
            "indexed": indexed,
        }))?
    );
    Ok(())
}

async fn run_index_lessons_cli(args: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_usage();
        return Ok(());
    }
    let parsed = parse_index_lessons_cli_args(args.as_slice())?;
    let (store, settings) = open_store_for_cli(&parsed.common)?;
    let Some(report) =
        index_lessons_with_settings(Arc::new(store), &settings, parsed.lesson_id.as_deref()).await?
    else {
        return Err(std::io::Error::other(
            "Embeddings are not configured; set TUTOR_EMBEDDINGS_BASE_URL",
        )
        .into());
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "ok": true,
            "indexed": report,
        }))?
    );
    Ok(())
}

/// `None` when no embeddings endpoint is configured.
async fn index_lessons_with_settings(
    store: SharedLearningStore,
    settings: &TutorSettings,
    lesson_id: Option<&str>,
) -> Result<Option<IndexReport>, Box<dyn std::error::Error>> {
    let Some(embedder) = HttpEmbedder::from_settings(&settings.embeddings) else {
        return Ok(None);
    };
    let search = EmbeddingSearch::new(store, Arc::new(embedder));
    Ok(Some(search.index_lessons(lesson_id).await?))
}

fn print_usage() {
    eprintln!(concat!(
        "Usage:\n",
        "  tutor-backend-core [serve] [--app-root PATH]\n",
        "  tutor-backend-core issue-student-token --student-id <id> [--label <label>] [--app-root PATH]\n",
        "  tutor-backend-core seed-demo [--app-root PATH]\n",
        "  tutor-backend-core index-lessons [--lesson-id <id>] [--app-root PATH]\n\n",
        "Settings come from config/tutor.settings.toml under the app root (or TUTOR_SETTINGS_PATH)\n",
        "and TUTOR_* environment variables.\n"
    ));
}
