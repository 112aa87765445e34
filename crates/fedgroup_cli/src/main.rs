//! Inspection entry point for an existing group store database.
//!
//! # Usage
//! - `fedgroup_cli` prints ping/version to verify `fedgroup_core` linkage.
//! - `fedgroup_cli groups <db> [search]`
//! - `fedgroup_cli user-groups <db> <uid>`
//! - `fedgroup_cli members <db> <gid> [search]`
//! - `fedgroup_cli memberships <db> [uid]`
//!
//! The database file must already exist; opening it applies any pending
//! schema migrations.
//!
//! Setting `FEDGROUP_LOG_DIR` (absolute path) enables rolling file logs.

use fedgroup_core::db::open_db;
use fedgroup_core::{
    default_log_level, init_logging, GroupListQuery, GroupRepository, MemberListQuery,
    SqliteGroupRepository,
};
use std::error::Error;
use std::path::Path;
use std::process::ExitCode;

const USAGE: &str = "usage: fedgroup_cli [groups <db> [search] | user-groups <db> <uid> | members <db> <gid> [search] | memberships <db> [uid]]";

fn main() -> ExitCode {
    if let Ok(log_dir) = std::env::var("FEDGROUP_LOG_DIR") {
        if let Err(err) = init_logging(default_log_level(), &log_dir) {
            eprintln!("logging disabled: {err}");
        }
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args) {
        Ok(lines) => {
            for line in lines {
                println!("{line}");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &[String]) -> Result<Vec<String>, Box<dyn Error>> {
    let Some((command, rest)) = args.split_first() else {
        return Ok(vec![
            format!("fedgroup_core ping={}", fedgroup_core::ping()),
            format!("fedgroup_core version={}", fedgroup_core::core_version()),
        ]);
    };
    let Some(db_path) = rest.first() else {
        return Err(USAGE.into());
    };
    let arg = |idx: usize| rest.get(idx).cloned();
    if !Path::new(db_path).is_file() {
        return Err(format!("database `{db_path}` does not exist").into());
    }

    let conn = open_db(db_path)?;
    let repo = SqliteGroupRepository::new(&conn);
    let lines = match command.as_str() {
        "groups" => repo.get_groups(&GroupListQuery {
            search: arg(1),
            ..GroupListQuery::default()
        })?,
        "user-groups" => {
            let uid = arg(1).ok_or(USAGE)?;
            repo.get_user_groups(&uid)?.into_iter().collect()
        }
        "members" => {
            let gid = arg(1).ok_or(USAGE)?;
            repo.users_in_group(
                &gid,
                &MemberListQuery {
                    search: arg(2),
                    ..MemberListQuery::default()
                },
            )?
        }
        "memberships" => repo
            .list_memberships(arg(1).as_deref())?
            .into_iter()
            .map(|membership| format!("{}\t{}", membership.uid, membership.gid))
            .collect(),
        _ => return Err(USAGE.into()),
    };
    Ok(lines)
}
