use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rollcall_core::{
    paths, AttendanceLedger, AttendanceRecord, DirectoryGallery, EnrollmentCollection, Session,
    SqliteLedger,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance records", version)]
struct Cli {
    /// Attendance database
    #[arg(long, global = true, default_value_os_t = paths::default_db_path())]
    db: PathBuf,
    /// Parent directory of the roster image collections
    #[arg(long, global = true, default_value_os_t = paths::default_gallery_root())]
    gallery_root: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show who attended a session
    Retrieve {
        #[command(flatten)]
        class: ClassArgs,
        /// Session date (YYYY-MM-DD)
        #[arg(long)]
        date: String,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// List every session in the database
    Sessions,
    /// List the identities enrolled for a class
    Roster {
        #[command(flatten)]
        class: ClassArgs,
    },
}

#[derive(Args)]
struct ClassArgs {
    /// Course code, e.g. SE-223
    #[arg(long)]
    course: String,
    /// Course section, e.g. A
    #[arg(long)]
    section: String,
    /// Semester, e.g. "Spring 2025"
    #[arg(long)]
    semester: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    print!("{}", execute(cli.command, &cli.db, &cli.gallery_root)?);
    Ok(())
}

/// Run one subcommand and return what it prints.
fn execute(command: Commands, db: &Path, gallery_root: &Path) -> Result<String> {
    let mut out = String::new();
    match command {
        Commands::Retrieve { class, date, json } => {
            let session = Session::parse(&class.course, &class.section, &class.semester, &date)?;
            let ledger = open_existing(db)?;
            let records = ledger.retrieve(&session.key())?;
            if json {
                out.push_str(&serde_json::to_string_pretty(&records)?);
                out.push('\n');
            } else if records.is_empty() {
                out.push_str(&format!("No attendance recorded for {session}\n"));
            } else {
                out.push_str(&render_table(&records));
            }
        }
        Commands::Sessions => {
            let ledger = open_existing(db)?;
            let sessions = ledger.sessions()?;
            if sessions.is_empty() {
                out.push_str("No sessions recorded\n");
            }
            for key in sessions {
                out.push_str(&format!("{key}\n"));
            }
        }
        Commands::Roster { class } => {
            let session = Session::today(&class.course, &class.section, &class.semester)?;
            let dir = gallery_root.join(session.roster_key());
            if !dir.is_dir() {
                out.push_str(&format!("No enrollment images for {}\n", session.roster_key()));
                return Ok(out);
            }
            let gallery = DirectoryGallery::open(&dir)?;
            for entry in gallery.list()? {
                out.push_str(&format!("{}\n", entry.identity));
            }
        }
    }
    Ok(out)
}

/// Open the ledger without creating a database that does not exist yet.
fn open_existing(path: &Path) -> Result<SqliteLedger> {
    if !path.exists() {
        bail!("no attendance database at {}", path.display());
    }
    tracing::debug!(path = %path.display(), "opening attendance database");
    SqliteLedger::open(path).with_context(|| format!("opening {}", path.display()))
}

fn render_table(records: &[AttendanceRecord]) -> String {
    let width = records
        .iter()
        .map(|r| r.identity.len())
        .max()
        .unwrap_or(0)
        .max("ID".len());
    let mut out = format!("{:<width$}  Timestamp\n", "ID");
    for record in records {
        out.push_str(&format!("{:<width$}  {}\n", record.identity, record.timestamp));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rollcall_core::{LedgerError, SessionError};
    use tempfile::TempDir;

    fn class() -> ClassArgs {
        ClassArgs {
            course: "SE-223".into(),
            section: "A".into(),
            semester: "Spring 2025".into(),
        }
    }

    fn retrieve(date: &str, json: bool) -> Commands {
        Commands::Retrieve {
            class: class(),
            date: date.into(),
            json,
        }
    }

    /// Database holding the 2025-04-01 session, with `identities` recorded.
    fn database(identities: &[&str]) -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance_system.db");
        let ledger = SqliteLedger::open(&path).unwrap();
        let key = Session::parse("SE-223", "A", "Spring 2025", "2025-04-01")
            .unwrap()
            .key();
        ledger.ensure_session(&key).unwrap();
        for identity in identities {
            ledger.mark_attendance(&key, identity).unwrap();
        }
        (dir, path)
    }

    fn record(identity: &str, timestamp: &str) -> AttendanceRecord {
        AttendanceRecord {
            identity: identity.into(),
            timestamp: timestamp.into(),
        }
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_retrieve_arguments() {
        let cli = Cli::try_parse_from([
            "rollcall",
            "retrieve",
            "--course",
            "SE-223",
            "--section",
            "A",
            "--semester",
            "Spring 2025",
            "--date",
            "2025-04-01",
            "--db",
            "/tmp/a.db",
        ])
        .unwrap();
        assert_eq!(cli.db, PathBuf::from("/tmp/a.db"));
        match cli.command {
            Commands::Retrieve { class, date, json } => {
                assert_eq!(class.semester, "Spring 2025");
                assert_eq!(date, "2025-04-01");
                assert!(!json);
            }
            _ => panic!("expected retrieve"),
        }
    }

    #[test]
    fn test_render_table_aligns_columns() {
        let table = render_table(&[
            record("12345", "2025-04-01 09:00:00"),
            record("alice", "2025-04-01 09:01:30"),
        ]);
        assert_eq!(
            table,
            "ID     Timestamp\n12345  2025-04-01 09:00:00\nalice  2025-04-01 09:01:30\n"
        );
    }

    #[test]
    fn test_open_existing_refuses_missing_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db");
        assert!(open_existing(&path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_retrieve_prints_table() {
        let (dir, db) = database(&["12345", "alice"]);
        let out = execute(retrieve("2025-04-01", false), &db, dir.path()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ID"));
        assert!(lines[1].starts_with("12345  "));
        assert!(lines[2].starts_with("alice  "));
    }

    #[test]
    fn test_retrieve_json() {
        let (dir, db) = database(&["12345"]);
        let out = execute(retrieve("2025-04-01", true), &db, dir.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value[0]["identity"], "12345");
        assert!(value[0]["timestamp"].is_string());
    }

    #[test]
    fn test_retrieve_empty_session_is_not_an_error() {
        let (dir, db) = database(&[]);
        let out = execute(retrieve("2025-04-01", false), &db, dir.path()).unwrap();
        assert!(out.starts_with("No attendance recorded for"));
    }

    #[test]
    fn test_retrieve_invalid_date() {
        let (dir, db) = database(&[]);
        let err = execute(retrieve("04/01/2025", false), &db, dir.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::InvalidDateFormat(_))
        ));
    }

    #[test]
    fn test_retrieve_unknown_session() {
        let (dir, db) = database(&["12345"]);
        let err = execute(retrieve("2025-04-02", false), &db, dir.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LedgerError>(),
            Some(LedgerError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_sessions_lists_keys() {
        let (dir, db) = database(&[]);
        let out = execute(Commands::Sessions, &db, dir.path()).unwrap();
        assert_eq!(out, "2025_04_01_spring_2025_se-223_a\n");
    }

    #[test]
    fn test_roster_lists_identities() {
        let dir = tempfile::tempdir().unwrap();
        let roster = dir.path().join("se-223_a_spring_2025");
        let gallery = DirectoryGallery::open(&roster).unwrap();
        let face = image::RgbImage::from_pixel(8, 8, image::Rgb([200, 60, 60]));
        gallery.write("bob", &face).unwrap();
        gallery.write("alice", &face).unwrap();

        let db = dir.path().join("unused.db");
        let out = execute(Commands::Roster { class: class() }, &db, dir.path()).unwrap();
        assert_eq!(out, "alice\nbob\n");
    }

    #[test]
    fn test_roster_missing_directory_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("unused.db");
        let out = execute(Commands::Roster { class: class() }, &db, dir.path()).unwrap();
        assert!(out.starts_with("No enrollment images for se-223_a_spring_2025"));
        assert!(!dir.path().join("se-223_a_spring_2025").exists());
    }
}
