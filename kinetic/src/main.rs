use std::{fs, path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use kinetic::commands::{self, Status, StatusKind};
use kinetic::settings::{Settings, load_settings};
use kinetic::storage::{FsDocumentStore, JsonSettingsStore};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Parser)]
#[command(
    name = "kinetic",
    about = "Task ledger tooling for a Markdown vault",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    /// Emit the command status and report as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(flatten)]
    vault: VaultArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct VaultArgs {
    /// Vault root directory.
    #[arg(long, global = true, default_value = ".")]
    vault: PathBuf,
    /// Settings file. Defaults to `<vault>/.kinetic/settings.json`.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    /// Ledger path for this run, relative to the vault.
    #[arg(long, global = true)]
    ledger: Option<String>,
    /// Projects document for this run, relative to the vault.
    #[arg(long, global = true)]
    projects: Option<String>,
    /// Only render projects whose status matches, for this run.
    #[arg(long, global = true, conflicts_with = "all_statuses")]
    status_filter: Option<String>,
    /// Render every project that has open tasks, for this run.
    #[arg(long, global = true)]
    all_statuses: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Copy open tasks from every note into the ledger, stamping missing IDs.
    Consolidate,

    /// Drop ledger blocks that repeat an earlier task ID.
    Dedupe,

    /// Regenerate the Existing Projects section from the ledger.
    RebuildProjects,

    /// Mark ledger tasks done when they are checked in the Existing Projects section.
    SyncCompletions,

    /// Print the ledger index and the next task ID.
    Inspect,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json = cli.json;
    let status = run(cli).unwrap_or_else(|err| Status::from_error(&err));
    emit(&status, json);
    ExitCode::from(status.exit_code())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn run(cli: Cli) -> Result<Status> {
    let Cli { vault, command, .. } = cli;
    let root = fs::canonicalize(&vault.vault)
        .with_context(|| format!("resolving vault {:?}", vault.vault))?;
    let mut settings_store = match &vault.settings {
        Some(path) => JsonSettingsStore::new(path),
        None => JsonSettingsStore::for_vault(&root),
    };
    let settings = load_settings(&settings_store)
        .with_context(|| format!("loading settings from {:?}", settings_store.path()))?;
    let settings = apply_overrides(settings, &vault);
    debug!(vault = ?root, ledger = %settings.ledger_path, projects = %settings.projects_path, "resolved settings");

    let mut docs = FsDocumentStore::new(&root);
    match command {
        Commands::Consolidate => commands::run_consolidate(&mut docs, &mut settings_store, &settings),
        Commands::Dedupe => commands::run_dedupe(&mut docs, &settings),
        Commands::RebuildProjects => commands::run_rebuild_projects(&mut docs, &settings),
        Commands::SyncCompletions => commands::run_sync_completions(&mut docs, &settings),
        Commands::Inspect => commands::run_inspect(&docs, &settings),
    }
}

/// Overrides apply to this run only; they never reach the settings file.
fn apply_overrides(mut settings: Settings, args: &VaultArgs) -> Settings {
    if let Some(ledger) = &args.ledger {
        settings.ledger_path = ledger.clone();
    }
    if let Some(projects) = &args.projects {
        settings.projects_path = projects.clone();
    }
    if args.all_statuses {
        settings.status_filter = None;
    } else if let Some(filter) = &args.status_filter {
        settings.status_filter = Some(filter.clone());
    }
    settings
}

fn emit(status: &Status, json: bool) {
    if json {
        match serde_json::to_string_pretty(status) {
            Ok(text) => println!("{text}"),
            Err(err) => eprintln!("error: serializing status: {err}"),
        }
        return;
    }
    match status.kind {
        StatusKind::Ok | StatusKind::Info => println!("{}", status.message),
        StatusKind::Failed => eprintln!("error: {}", status.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinetic::commands::exit_codes;
    use std::path::Path;

    fn cli(vault: &Path, args: &[&str]) -> Cli {
        let mut argv = vec!["kinetic".to_string(), "--vault".to_string(), vault.display().to_string()];
        argv.extend(args.iter().map(|a| a.to_string()));
        Cli::try_parse_from(argv).expect("parse args")
    }

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, text).expect("write");
    }

    fn read(root: &Path, rel: &str) -> String {
        fs::read_to_string(root.join(rel)).expect("read")
    }

    #[test]
    fn full_cycle_against_a_vault_on_disk() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        write(root, "Daily/2025-01-06.md", "# Monday\n- [ ] Plant tulips #P3\n  - front bed\n");
        write(
            root,
            "Projects.md",
            "# Projects\n\n| ID | Name | Status |\n| --- | --- | --- |\n| P3 | Garden | In progress. |\n",
        );

        let status = run(cli(root, &["consolidate"])).expect("consolidate");
        assert_eq!(status.kind, StatusKind::Ok);
        assert_eq!(
            read(root, "Daily/2025-01-06.md"),
            "# Monday\n- [ ] ^t1^ Plant tulips #P3\n  - front bed\n"
        );
        assert_eq!(
            read(root, "Tasks/Kinetic-Tasks.md"),
            "- [ ] ^t1^ Plant tulips #P3\n  - front bed"
        );
        let stored: Settings =
            serde_json::from_str(&read(root, ".kinetic/settings.json")).expect("settings json");
        assert_eq!(stored.next_id, 2);
        assert!(stored.last_consolidated_at.is_some());

        run(cli(root, &["rebuild-projects"])).expect("rebuild");
        let view = read(root, "Projects.md");
        assert!(view.contains("# Existing Projects\n\n## 📁 Garden (P3)\n\n**Summary:** 1 open task\n"));
        assert!(view.ends_with("- [ ] ^t1^ Plant tulips #P3\n  - front bed\n"));

        write(root, "Projects.md", &view.replace("- [ ] ^t1^", "- [x] ^t1^"));
        let status = run(cli(root, &["sync-completions"])).expect("sync");
        assert_eq!(status.kind, StatusKind::Ok);
        assert_eq!(
            read(root, "Tasks/Kinetic-Tasks.md"),
            "- [x] ^t1^ Plant tulips #P3\n  - front bed"
        );

        let status = run(cli(root, &["consolidate"])).expect("second consolidate");
        assert_eq!(status.kind, StatusKind::Info);
    }

    #[test]
    fn overrides_are_not_persisted() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        write(root, "Inbox.md", "- [ ] Call Bob");

        run(cli(root, &["--ledger", "Ledger.md", "consolidate"])).expect("consolidate");

        assert_eq!(read(root, "Ledger.md"), "- [ ] ^t1^ Call Bob");
        let stored: Settings =
            serde_json::from_str(&read(root, ".kinetic/settings.json")).expect("settings json");
        assert_eq!(stored.ledger_path, "Tasks/Kinetic-Tasks.md");
        assert_eq!(stored.next_id, 2);
    }

    #[test]
    fn all_statuses_clears_the_filter() {
        let args = cli(Path::new("."), &["--all-statuses", "inspect"]);
        let settings = apply_overrides(Settings::default(), &args.vault);
        assert_eq!(settings.status_filter, None);

        let args = cli(Path::new("."), &["--status-filter", "Someday", "inspect"]);
        let settings = apply_overrides(Settings::default(), &args.vault);
        assert_eq!(settings.status_filter(), Some("Someday"));

        let conflict = Cli::try_parse_from(["kinetic", "--all-statuses", "--status-filter", "x", "inspect"]);
        assert!(conflict.is_err());
    }

    #[test]
    fn missing_projects_file_exits_with_missing_document_code() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        write(root, "Tasks/Kinetic-Tasks.md", "- [ ] ^t1^ A #P1");

        let err = run(cli(root, &["rebuild-projects"])).expect_err("missing projects");
        let status = Status::from_error(&err);
        assert_eq!(status.exit_code(), exit_codes::MISSING_DOCUMENT);
        assert!(status.message.contains("projects file not found at Projects.md"));
    }
}
