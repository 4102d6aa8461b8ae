use std::{path::Path, sync::Arc};

use clap::Parser;
use photosearch::{
    ConfigDb,
    DataDir,
    Error,
    Maintenance,
    Result,
    ScanOptions,
    Scanner,
    VectorStore,
    config_db::FolderRecord,
    vector_store::Collection,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, FolderAction, SettingAction};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("PHOTOSEARCH_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;
    config_db.recover_interrupted()?;

    match cli.command {
        Command::Folder { action } => match action {
            FolderAction::Add { path, name } => {
                folder_add(&config_db, &path, name.as_deref())?;
            }
            FolderAction::Remove { id, delete_vectors } => {
                folder_remove(&config_db, &data_dir, &id, delete_vectors)?;
            }
            FolderAction::List { json } => {
                folder_list(&config_db, json)?;
            }
            FolderAction::Show { id, json } => {
                let folder = require_folder(&config_db, &id)?;
                if json {
                    print_json(&folder)?;
                } else {
                    print_folder(&folder);
                }
            }
        },
        Command::Scan(args) => {
            let store = open_store(&data_dir)?;
            cmd_scan(&config_db, &store, &args)?;
        }
        Command::Health(args) => {
            let maintenance = Maintenance::new(Arc::new(open_store(&data_dir)?));
            let report = maintenance.health_check()?;
            if args.json {
                print_json(&report)?;
            } else {
                println!("Records: {}", report.total);
                println!("Valid: {}", report.valid);
                println!("Stale: {} ({:.1}%)", report.stale, report.stale_rate);
                if report.failed > 0 {
                    println!("Unchecked: {}", report.failed);
                }
                for line in &report.recommendations {
                    println!("  - {line}");
                }
            }
        }
        Command::Cleanup(args) => {
            let maintenance = Maintenance::new(Arc::new(open_store(&data_dir)?));
            let report = maintenance.cleanup(args.apply)?;
            if args.json {
                print_json(&report)?;
            } else if report.found == 0 {
                println!("No stale records.");
            } else {
                for stale in &report.stale {
                    println!("{}\t{}", stale.id, stale.path);
                }
                if args.apply {
                    println!(
                        "\nRemoved {} of {} stale record(s)",
                        report.removed, report.found
                    );
                } else {
                    println!(
                        "\n{} stale record(s); rerun with --apply to remove them",
                        report.found
                    );
                }
            }
        }
        Command::Optimize(args) => {
            let maintenance = Maintenance::new(Arc::new(open_store(&data_dir)?));
            let report = maintenance.optimize()?;
            if args.json {
                print_json(&report)?;
            } else {
                println!(
                    "Checked {} record(s), {} stale",
                    report.health.total, report.health.stale
                );
                match report.cleanup {
                    Some(cleanup) => {
                        println!("Removed {} stale record(s)", cleanup.removed)
                    }
                    None => println!("Nothing to clean up."),
                }
            }
        }
        Command::Status(args) => {
            let store = Arc::new(open_store(&data_dir)?);
            cmd_status(&config_db, store, &data_dir, args.json)?;
        }
        Command::Setting { action } => match action {
            SettingAction::Set { key, value } => {
                config_db.set_setting(&key, &value)?;
                println!("{key} = {value}");
            }
            SettingAction::Get { key } => match config_db.get_setting(&key)? {
                Some(value) => println!("{value}"),
                None => {
                    return Err(Error::NotFound {
                        kind: "setting",
                        name: key,
                    });
                }
            },
        },
        Command::Completions(args) => args.generate(),
    }

    Ok(())
}

fn open_store(data_dir: &DataDir) -> Result<VectorStore> {
    VectorStore::open(&data_dir.vectors_db(), true)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn require_folder(config_db: &ConfigDb, id: &str) -> Result<FolderRecord> {
    config_db.get_folder(id)?.ok_or_else(|| Error::NotFound {
        kind: "folder",
        name: id.to_string(),
    })
}

fn print_folder(folder: &FolderRecord) {
    println!("id: {}", folder.id);
    println!("name: {}", folder.name);
    println!("path: {}", folder.path);
    println!("status: {}", folder.status);
    println!("images: {}", folder.image_count);
    println!("indexed: {}", folder.indexed_count);
    match folder.last_scan {
        Some(ts) => println!("last scan: {ts}"),
        None => println!("last scan: never"),
    }
}

fn folder_add(
    config_db: &ConfigDb,
    path: &Path,
    name: Option<&str>,
) -> Result<()> {
    let folder = config_db.add_folder(path, name)?;
    println!("Added folder '{}' ({}) -> {}", folder.name, folder.id, folder.path);
    Ok(())
}

fn folder_remove(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    id: &str,
    delete_vectors: bool,
) -> Result<()> {
    let folder = require_folder(config_db, id)?;

    let report = if delete_vectors {
        let maintenance = Maintenance::new(Arc::new(open_store(data_dir)?));
        Some(maintenance.remove_folder_records(id)?)
    } else {
        None
    };
    config_db.remove_folder(id)?;

    if let Some(report) = report {
        println!(
            "Removed folder '{}' and {} record(s)",
            folder.name, report.removed
        );
        if report.failed > 0 {
            println!("{} record(s) could not be removed", report.failed);
        }
    } else {
        println!("Removed folder '{}'", folder.name);
    }
    Ok(())
}

fn folder_list(config_db: &ConfigDb, json: bool) -> Result<()> {
    let folders = config_db.list_folders()?;

    if json {
        print_json(&folders)?;
    } else if folders.is_empty() {
        println!("No folders registered.");
    } else {
        for folder in &folders {
            println!(
                "{}\t{}\t{}\t{}/{}",
                folder.id,
                folder.status,
                folder.path,
                folder.indexed_count,
                folder.image_count
            );
        }
    }
    Ok(())
}

fn cmd_scan(
    config_db: &ConfigDb,
    store: &VectorStore,
    args: &cli::ScanArgs,
) -> Result<()> {
    let folder = require_folder(config_db, &args.folder)?;
    let options = ScanOptions {
        check_duplicates: !args.allow_duplicates,
        verify_images: !args.no_verify,
    };
    let report = Scanner::new(store, options).scan(Path::new(&folder.path))?;
    config_db.update_folder_stats(&folder.id, Some(report.valid.len()), None)?;

    if args.json {
        return print_json(&report);
    }

    println!(
        "{}: {} photo(s), {} duplicate(s), {} problem(s)",
        folder.name,
        report.valid.len(),
        report.duplicates.len(),
        report.errors.len()
    );
    for dup in &report.duplicates {
        println!(
            "  duplicate: {} (same as {})",
            dup.path.display(),
            dup.existing_path
        );
    }
    for err in &report.errors {
        println!("  {err}");
    }
    Ok(())
}

fn cmd_status(
    config_db: &ConfigDb,
    store: Arc<VectorStore>,
    data_dir: &DataDir,
    json: bool,
) -> Result<()> {
    let visual = store.count(Collection::Visual)?;
    let semantic = store.count(Collection::Semantic)?;
    let health = Maintenance::new(store).stats()?;
    let totals = config_db.folder_totals()?;
    let visual_model = config_db.get_setting_or("visual_model", "unset")?;

    if json {
        let status = serde_json::json!({
            "data_dir": data_dir.root(),
            "visual_model": visual_model,
            "visual_records": visual,
            "semantic_records": semantic,
            "flagged_stale": health.flagged_stale,
            "folders": totals,
        });
        return print_json(&status);
    }

    println!("Data directory: {}", data_dir.root().display());
    println!("Visual model: {visual_model}");
    println!("Visual records: {visual}");
    println!("Semantic records: {semantic}");
    if !health.healthy {
        println!(
            "Stale records: {} (run `photosearch cleanup`)",
            health.flagged_stale
        );
    }
    println!(
        "Folders: {} ({} active)",
        totals.total_folders, totals.active_folders
    );
    println!(
        "Images: {} indexed of {} found",
        totals.total_indexed, totals.total_images
    );
    Ok(())
}
