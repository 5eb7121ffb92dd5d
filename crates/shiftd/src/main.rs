use anyhow::{anyhow, bail, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use shift_core::bulk::BulkResult;
use shift_core::config::{load_engine_config, EngineConfig, LoggingConfig, StoreBackend};
use shift_core::state::ShiftStatus;
use shift_core::types::{
    CompanyId, ResourceId, ResourceKind, ResourceRef, RoleId, ShiftDraft, ShiftId, SlotTarget,
};
use shift_core::validation::{Validate, ValidationLevel};
use shift_core::window::ShiftWindow;
use shiftd::{
    EngineError, InMemoryDirectory, MemoryShiftStore, PageRequest, ResourceDirectory,
    SchedulingEngine, ShiftQuery, ShiftStore, SqliteShiftStore,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "config/engine.toml";

#[derive(Debug, Parser)]
#[command(name = "shiftctl", version, about = "Operate the shift scheduling engine")]
struct Cli {
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Overrides `store.backend` from the config file.
    #[arg(long, global = true, value_enum)]
    store: Option<StoreArg>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreArg {
    Memory,
    Sqlite,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create or upgrade the sqlite schema.
    Migrate,
    /// Create a shift from a JSON draft.
    Create {
        #[arg(long)]
        draft: PathBuf,
    },
    Assign {
        shift: String,
        /// Role id, or `locomotive`.
        slot: SlotTarget,
        resource: String,
        #[arg(long)]
        expected_version: u64,
    },
    Unassign {
        shift: String,
        slot: SlotTarget,
        #[arg(long)]
        expected_version: u64,
    },
    Move {
        shift: String,
        #[arg(long)]
        date: String,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long)]
        expected_version: u64,
    },
    /// Transition one shift (with `--expected-version`) or a selection.
    Transition {
        #[arg(required = true)]
        shifts: Vec<String>,
        #[arg(long)]
        to: ShiftStatus,
        #[arg(long)]
        expected_version: Option<u64>,
    },
    Delete {
        #[arg(required = true)]
        shifts: Vec<String>,
    },
    Show {
        shift: String,
        #[arg(long)]
        events: bool,
    },
    List {
        #[arg(long)]
        company: String,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long)]
        status: Option<ShiftStatus>,
    },
    /// Active bookings of one resource, in time order.
    Schedule {
        #[arg(long)]
        company: String,
        #[arg(long, default_value = "employee")]
        kind: ResourceKind,
        resource: String,
    },
    /// Resources able to fill a role.
    Eligible {
        #[arg(long)]
        company: String,
        #[arg(long)]
        role: String,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(err) => {
            eprintln!("shiftctl failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<bool> {
    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;
    init_logging(&config.logging);
    check_config(&config)?;

    if let Some(store) = cli.store {
        config.store.backend = match store {
            StoreArg::Memory => StoreBackend::Memory,
            StoreArg::Sqlite => StoreBackend::Sqlite,
        };
    }
    let directory = load_directory(&config.directory.catalog_path)?;

    match config.store.backend {
        StoreBackend::Memory => {
            let engine = SchedulingEngine::new(
                MemoryShiftStore::new(),
                directory,
                config.staffing.clone(),
            );
            execute(&engine, cli.command)
        }
        StoreBackend::Sqlite => {
            let store = open_sqlite(&config.store.sqlite_path)?;
            let engine = SchedulingEngine::new(store, directory, config.staffing.clone());
            execute(&engine, cli.command)
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }
    Ok(load_engine_config(path)?)
}

/// `RUST_LOG` wins over the configured filter.
fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.filter.trim()))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn check_config(config: &EngineConfig) -> anyhow::Result<()> {
    let mut errors = Vec::new();
    for issue in config.validate() {
        match issue.level {
            ValidationLevel::Warning => warn!(code = issue.code, "{}", issue.message),
            ValidationLevel::Error => errors.push(format!("{}: {}", issue.code, issue.message)),
        }
    }
    if !errors.is_empty() {
        bail!("invalid config: {}", errors.join("; "));
    }
    Ok(())
}

fn load_directory(path: &Path) -> anyhow::Result<InMemoryDirectory> {
    if !path.exists() {
        debug!(path = %path.display(), "no resource catalog; directory is empty");
        return Ok(InMemoryDirectory::new());
    }
    Ok(InMemoryDirectory::load(path)?)
}

fn open_sqlite(path: &Path) -> anyhow::Result<SqliteShiftStore> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = SqliteShiftStore::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    store.migrate()?;
    Ok(store)
}

fn execute<S: ShiftStore>(
    engine: &SchedulingEngine<S, InMemoryDirectory>,
    command: Command,
) -> anyhow::Result<bool> {
    match command {
        // Opening the store already migrated it.
        Command::Migrate => print_json(&serde_json::json!({ "migrated": true })),
        Command::Create { draft: path } => {
            let body = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let draft: ShiftDraft = serde_json::from_str(&body)
                .with_context(|| format!("failed to parse draft {}", path.display()))?;
            reply(engine.create_shift(draft))
        }
        Command::Assign {
            shift,
            slot,
            resource,
            expected_version,
        } => reply(engine.assign_resource(
            &ShiftId::new(shift),
            &slot,
            &ResourceId::new(resource),
            expected_version,
        )),
        Command::Unassign {
            shift,
            slot,
            expected_version,
        } => reply(engine.unassign_resource(&ShiftId::new(shift), &slot, expected_version)),
        Command::Move {
            shift,
            date,
            start,
            end,
            expected_version,
        } => {
            let window = ShiftWindow::parse(&date, &start, &end).map_err(|err| anyhow!(err))?;
            reply(engine.move_shift(&ShiftId::new(shift), window, expected_version))
        }
        Command::Transition {
            shifts,
            to,
            expected_version,
        } => match expected_version {
            Some(version) => {
                let [single] = shifts.as_slice() else {
                    bail!("--expected-version applies to a single shift");
                };
                reply(engine.transition_shift(&ShiftId::new(single.as_str()), to, version))
            }
            None => reply_bulk(engine.bulk_transition(&shift_ids(shifts), to)),
        },
        Command::Delete { shifts } => reply_bulk(engine.delete_shifts(&shift_ids(shifts))),
        Command::Show { shift, events } => {
            let shift_id = ShiftId::new(shift);
            let found = match engine.shift(&shift_id) {
                Ok(found) => found,
                Err(err) => return reply::<()>(Err(err)),
            };
            if events {
                let events = engine.events_for(&shift_id)?;
                print_json(&serde_json::json!({ "shift": found, "events": events }))
            } else {
                print_json(&found)
            }
        }
        Command::List {
            company,
            from,
            to,
            status,
        } => {
            let query = ShiftQuery {
                company_id: CompanyId::new(company),
                from,
                to,
                status,
            };
            print_json(&engine.list_shifts(&query)?)
        }
        Command::Schedule {
            company,
            kind,
            resource,
        } => {
            let resource = ResourceRef {
                kind,
                id: ResourceId::new(resource),
            };
            print_json(&engine.resource_schedule(&CompanyId::new(company), &resource)?)
        }
        Command::Eligible {
            company,
            role,
            search,
            offset,
            limit,
        } => {
            let page = engine.directory().list_eligible(
                &CompanyId::new(company),
                &RoleId::new(role),
                None,
                &PageRequest {
                    search,
                    offset,
                    limit,
                },
            )?;
            print_json(&page)
        }
    }
}

fn shift_ids(raw: Vec<String>) -> Vec<ShiftId> {
    raw.into_iter().map(ShiftId::new).collect()
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<bool> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(true)
}

/// Prints the value, or the rejection with its kind. Infrastructure errors
/// propagate.
fn reply<T: Serialize>(result: Result<T, EngineError>) -> anyhow::Result<bool> {
    match result {
        Ok(value) => print_json(&value),
        Err(EngineError::Rejected(rejection)) => {
            eprintln!("rejected ({}): {rejection}", rejection.kind());
            print_json(&rejection)?;
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}

fn reply_bulk(result: Result<BulkResult, EngineError>) -> anyhow::Result<bool> {
    let bulk = result?;
    print_json(&bulk)?;
    for (shift_id, rejection) in bulk.failures() {
        eprintln!("{shift_id}: rejected ({}): {rejection}", rejection.kind());
    }
    Ok(bulk.committed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_assign_with_locomotive_slot() {
        let cli = Cli::try_parse_from([
            "shiftctl",
            "--store",
            "memory",
            "assign",
            "SH-000001",
            "locomotive",
            "L1",
            "--expected-version",
            "3",
        ])
        .expect("parse");
        assert_eq!(cli.store, Some(StoreArg::Memory));
        match cli.command {
            Command::Assign {
                slot,
                expected_version,
                ..
            } => {
                assert_eq!(slot, SlotTarget::Locomotive);
                assert_eq!(expected_version, 3);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_bulk_transition_status() {
        let cli = Cli::try_parse_from(["shiftctl", "transition", "A", "B", "--to", "fixed"])
            .expect("parse");
        match cli.command {
            Command::Transition {
                shifts,
                to,
                expected_version,
            } => {
                assert_eq!(shifts, vec!["A", "B"]);
                assert_eq!(to, ShiftStatus::Fixed);
                assert_eq!(expected_version, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn create_then_show_through_memory_engine() {
        let dir = tempfile::tempdir().expect("tempdir");
        let draft_path = dir.path().join("draft.json");
        fs::write(
            &draft_path,
            r#"{
  "family": "REGULAR",
  "company_id": "1",
  "window": { "date": "2024-06-10", "start_time": "08:00:00", "end_time": "16:00:00" },
  "role_slots": [{ "role_id": "DRIVER" }],
  "customer_id": "C1",
  "project_id": "P1"
}"#,
        )
        .expect("write draft");

        let engine = SchedulingEngine::new(
            MemoryShiftStore::new(),
            InMemoryDirectory::new(),
            Default::default(),
        );
        let ok = execute(&engine, Command::Create { draft: draft_path }).expect("create");
        assert!(ok);
        let shift = engine.shift(&ShiftId::new("SH-000001")).expect("created");
        assert_eq!(shift.status, ShiftStatus::Open);

        let ok = execute(
            &engine,
            Command::Assign {
                shift: shift.id.0.clone(),
                slot: SlotTarget::role("DRIVER"),
                resource: "42".to_string(),
                expected_version: 1,
            },
        )
        .expect("rejection is not an error");
        assert!(!ok, "42 is not in the empty directory");
    }

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_config(&dir.path().join("absent.toml")).expect("defaults");
        assert_eq!(config, EngineConfig::default());
    }
}
