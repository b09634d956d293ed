//! Check and repair one user home or group shared directory.
//!
//! `licorn-chk --group devs /home/groups/devs` checks a group tree against the system and
//! per-group rules, `licorn-chk --show PATH` only prints the current ACLs of a path.

use clap::{ArgGroup, Parser};
use licorn_compliance::{
    load_rule_file, ACLError, Ask, Batch, DescriptorBuilder, Error, Identity, IdentityResolver,
    PosixACL, Qualifier, RepairSession, Result, Scope, SessionOptions, Settings, SystemIdentities,
    Terminal,
};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::exit;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Licorn directory compliance check
#[derive(Parser, Debug)]
#[command(name = "licorn-chk")]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("owner").args(["user", "group"])))]
#[command(group(ArgGroup::new("answer").args(["yes", "no"])))]
struct Cli {
    /// Settings file
    #[arg(short, long, default_value = "/etc/licorn/licorn.toml")]
    config: PathBuf,

    /// Repair everything without asking
    #[arg(short, long)]
    batch: bool,

    /// Answer yes to every question
    #[arg(short, long)]
    yes: bool,

    /// Answer no to every question
    #[arg(short, long)]
    no: bool,

    /// PATH is the home of this user (default: the owner of PATH)
    #[arg(short, long, value_name = "NAME")]
    user: Option<String>,

    /// PATH is the shared directory of this group
    #[arg(short, long, value_name = "NAME")]
    group: Option<String>,

    /// Members of the group may modify each other's files
    #[arg(long, requires = "group")]
    permissive: bool,

    /// Print the ACLs of PATH and exit
    #[arg(short, long)]
    show: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    path: PathBuf,
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = if cli.show {
        Ok(show(&cli.path, &SystemIdentities))
    } else {
        check(&cli)
    };
    match result {
        Ok(0) => {}
        Ok(code) => exit(code),
        Err(e) => {
            eprintln!("error: {}", e);
            exit(1);
        }
    }
}

/// Returns 2 when some repairs were refused or skipped.
fn check(cli: &Cli) -> Result<i32> {
    let settings = match Settings::load(&cli.config) {
        Ok(settings) => settings,
        Err(err) if !cli.config.exists() => {
            debug!("{}, using defaults", err);
            Settings::default()
        }
        Err(err) => return Err(err),
    };
    let ids = SystemIdentities;
    let owner = owner(cli, &ids)?;

    let system_file = match owner {
        Identity::Group { .. } => settings.rules.groups_default_path(),
        Identity::User { .. } => settings.rules.users_default_path(),
    };
    let system = load_rule_file(&system_file, Scope::SystemDefault, &settings.macros)?;
    let object = load_rule_file(
        &cli.path.join(&settings.rules.object_file),
        Scope::PerObject,
        &settings.macros,
    )?;
    let descriptors = DescriptorBuilder::new(&owner, &cli.path, &settings.macros, &ids)
        .permissive(cli.permissive)
        .assemble(&system, &object)?;

    let asker: Box<dyn Ask> = if cli.batch {
        Box::new(Batch)
    } else {
        Box::new(Terminal)
    };
    let options = SessionOptions {
        batch: cli.batch,
        auto_answer: match (cli.yes, cli.no) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        },
        full_display: true,
        walk: settings.walk.clone(),
    };
    let mut session = RepairSession::new(descriptors, options, asker, &ids);
    for event in session.by_ref() {
        let event = event?;
        debug!("{}: {}", event.path.display(), event.kind);
    }
    Ok(if session.is_complete() { 0 } else { 2 })
}

fn owner(cli: &Cli, ids: &dyn IdentityResolver) -> Result<Identity> {
    if let Some(name) = &cli.group {
        return ids.resolve_group(name).ok_or_else(|| Error::UnknownIdentity {
            kind: "group",
            name: name.clone(),
        });
    }
    let name = match &cli.user {
        Some(name) => name.clone(),
        None => cli
            .path
            .symlink_metadata()
            .map_err(|err| Error::io(&cli.path, err))?
            .uid()
            .to_string(),
    };
    ids.resolve_user(&name).ok_or(Error::UnknownIdentity { kind: "user", name })
}

fn print_acl(acl: &PosixACL, ids: &dyn IdentityResolver) {
    let entries = acl.entries_sorted();
    if entries.is_empty() {
        // If no "default" ACL has been set on directories, they have 0 entries.
        println!("    (no entries)")
    }
    for entry in entries {
        let subject = match entry.qual {
            Qualifier::User(uid) => format!("user:{}", ids.display_user(uid)),
            Qualifier::Group(gid) => format!("group:{}", ids.display_group(gid)),
            Qualifier::UserObj => "user:".into(),
            Qualifier::GroupObj => "group:".into(),
            Qualifier::Other => "other:".into(),
            Qualifier::Mask => "mask:".into(),
            Qualifier::Undefined => "invalid:".into(),
        };
        println!("    {}:{}", subject, licorn_compliance::perm_to_text(entry.perm));
    }
}

/// Returns 1 for error, 0 for success
fn handle_acl_result(
    result: std::result::Result<PosixACL, ACLError>,
    path: &Path,
    type_hint: &str,
    ids: &dyn IdentityResolver,
) -> i32 {
    match result {
        Ok(acl) => {
            println!("{} {}:", path.display(), type_hint);
            print_acl(&acl, ids);
            0
        }
        Err(e) => {
            eprintln!("{}: {}", path.display(), e);
            1
        }
    }
}

fn show(path: &Path, ids: &dyn IdentityResolver) -> i32 {
    let mut errs = handle_acl_result(PosixACL::read_acl(path), path, "ACL", ids);
    // Only directories have "default" ACLs
    if path.is_dir() {
        errs += handle_acl_result(PosixACL::read_default_acl(path), path, "DEFAULT", ids);
    }
    if errs > 0 {
        2
    } else {
        0
    }
}
