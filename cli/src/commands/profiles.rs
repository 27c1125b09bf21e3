use std::path::Path;

use futures::StreamExt;
use mare_core::api::{CliError, Pipeline, ProfileFilter, ProfileVersion, RoleProfile};
use serde_json::json;

use super::cli::{ListArgs, ProfilesCommand, ShowArgs};

pub const EXIT_VALIDATION: i32 = 12;

pub async fn run_profiles(pipeline: &Pipeline, cmd: ProfilesCommand) -> Result<i32, CliError> {
    match cmd {
        ProfilesCommand::List(args) => list(pipeline, args).await,
        ProfilesCommand::Show(args) => show(pipeline, args).await,
        ProfilesCommand::Add { files } => add(pipeline, &files).await,
        ProfilesCommand::Import { dir } => import(pipeline, &dir).await,
        ProfilesCommand::Validate { file } => validate(pipeline, &file).await,
    }
}

pub fn filter_from_args(args: &ListArgs) -> ProfileFilter {
    let mut filter = ProfileFilter::default().all_versions(args.all_versions);
    if let Some(a) = &args.archetype {
        filter = filter.archetype(a.clone());
    }
    if let Some(p) = &args.prefix {
        filter = filter.name_prefix(p.clone());
    }
    filter
}

async fn list(pipeline: &Pipeline, args: ListArgs) -> Result<i32, CliError> {
    let mut profiles = pipeline.list_profiles(filter_from_args(&args)).stream();
    while let Some(profile) = profiles.next().await {
        let profile = profile?;
        let line = json!({
            "name": profile.name,
            "version": profile.version,
            "archetype": profile.archetype,
            "base": profile.base,
        });
        println!("{line}");
    }
    Ok(0)
}

async fn show(pipeline: &Pipeline, args: ShowArgs) -> Result<i32, CliError> {
    let version = match args.version.as_deref() {
        None | Some("latest") => None,
        Some(v) => match v.parse::<ProfileVersion>() {
            Ok(v) => Some(v),
            Err(e) => {
                eprintln!("{e}");
                return Ok(EXIT_VALIDATION);
            }
        },
    };
    let profile = pipeline.get_profile(&args.name, version.as_ref()).await?;
    print_json(&*profile)?;
    Ok(0)
}

async fn add(pipeline: &Pipeline, files: &[std::path::PathBuf]) -> Result<i32, CliError> {
    for file in files {
        let Some(profile) = read_profile(file).await? else {
            return Ok(EXIT_VALIDATION);
        };
        let stored = pipeline.store_profile(profile).await?;
        let note = if stored.became_latest { " (latest)" } else { "" };
        println!("stored {}{note}", stored.key);
    }
    Ok(0)
}

async fn import(pipeline: &Pipeline, dir: &Path) -> Result<i32, CliError> {
    let report = mare_plugins::rep::import_dir(pipeline, dir).await?;
    for stored in &report.imported {
        println!("imported {}", stored.key);
    }
    for path in &report.skipped {
        println!("skipped {} (already stored)", path.display());
    }
    for failure in &report.failures {
        eprintln!("failed {}: {}", failure.path.display(), failure.error);
    }
    Ok(if report.is_clean() { 0 } else { EXIT_VALIDATION })
}

async fn validate(pipeline: &Pipeline, file: &Path) -> Result<i32, CliError> {
    let Some(profile) = read_profile(file).await? else {
        return Ok(EXIT_VALIDATION);
    };
    let result = pipeline.validate_profile(&profile);
    if result.is_valid() {
        println!("{} is valid", profile.key());
        return Ok(0);
    }
    for violation in &result.violations {
        eprintln!("{}: {violation}", profile.key());
    }
    Ok(EXIT_VALIDATION)
}

/// `None` when the file is not a well-formed profile; the reason is printed.
async fn read_profile(path: &Path) -> Result<Option<RoleProfile>, CliError> {
    let raw = tokio::fs::read_to_string(path).await?;
    match serde_json::from_str::<RoleProfile>(&raw) {
        Ok(p) => Ok(Some(p)),
        Err(e) => {
            eprintln!("{}: {e}", path.display());
            Ok(None)
        }
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| CliError::Command(e.to_string()))?;
    println!("{json}");
    Ok(())
}
