//! Per-subcommand dispatch (§4.13): `sync`/`import`/`export`/`merge`, each
//! processing every resolved repository in turn with per-repository error
//! isolation. Grounded on `bigitr/__init__.py`'s `_Runner`/`Synchronize`/
//! `Import`/`Export`/`Merge` and `gitcvs/gitmerge.py`'s `Merger`.

use bigitr_core::config::{AppConfig, RepoConfig};
use bigitr_core::runlog::RunLog;
use bigitr_notify::Mailer;
use bigitr_sync::error::SyncError;
use bigitr_sync::exporter::export_branch;
use bigitr_sync::importer::import_branch;
use bigitr_sync::merge::merge_cascade;
use bigitr_sync::sync::report_failure;

use crate::context::{build_context, parse_selectors, RepositoryContext};

pub enum SubCommand {
    Sync,
    Import,
    Export,
    Merge,
}

/// Runs `command` over every selector in `repositories` (empty means all
/// configured repositories). Returns whether any repository requested an
/// abort under `onerror=abort` — the caller maps this to the process exit
/// code.
pub fn run(
    command: SubCommand,
    app_config: &AppConfig,
    repo_config: &RepoConfig,
    repositories: &[String],
) -> anyhow::Result<bool> {
    let selectors = parse_selectors(repositories, repo_config)?;
    let mut aborted = false;

    for selector in selectors {
        if aborted {
            break;
        }
        let ctx = match build_context(app_config, repo_config, &selector.section) {
            Ok(ctx) => ctx,
            Err(err) => {
                eprintln!("[bigitr] skipping {}: {err}", selector.section);
                continue;
            }
        };

        let mut log = match RunLog::open(&ctx.log_dir, &ctx.name) {
            Ok(log) => log,
            Err(err) => {
                eprintln!("[bigitr] failed to open run log for {}: {err}", ctx.name);
                continue;
            }
        };
        let mut mailer = Mailer::new(ctx.name.clone(), ctx.mailer_recipients.clone(), ctx.mailfrom.clone(), ctx.smarthost.clone());

        let should_abort = match command {
            SubCommand::Sync => run_sync(&ctx, &mut log, &mut mailer),
            SubCommand::Import => run_import(&ctx, &mut log, &mut mailer),
            SubCommand::Export => run_export(&ctx, &selector.requested_branch, &mut log, &mut mailer),
            SubCommand::Merge => run_merge(&ctx, &selector.requested_branch, &mut log, &mut mailer),
        };
        aborted = should_abort;

        let mut out_buf = String::new();
        let mut err_buf = String::new();
        if let Ok(segment) = log.last_output() {
            out_buf = segment.stdout.unwrap_or_default();
            err_buf = segment.stderr.unwrap_or_default();
        }
        if let Err(err) = mailer.send(&out_buf, &err_buf) {
            eprintln!("[bigitr] failed to send report for {}: {err}", ctx.name);
        }
        if let Err(err) = log.close(ctx.compress_logs) {
            eprintln!("[bigitr] failed to close run log for {}: {err}", ctx.name);
        }
    }

    Ok(aborted)
}

/// `sync` ignores the requested branch entirely, mirroring
/// `Synchronize.run`'s `lambda x, y, **z: s.synchronize(x, y)`.
fn run_sync(ctx: &RepositoryContext, log: &mut RunLog, mailer: &mut Mailer) -> bool {
    if ctx.pre_import && run_import(ctx, log, mailer) {
        return true;
    }
    if run_export(ctx, &None, log, mailer) {
        return true;
    }
    run_import(ctx, log, mailer)
}

/// `import` also ignores the requested branch — `Importer.importBranches`
/// takes no such parameter in the reference implementation.
fn run_import(ctx: &RepositoryContext, log: &mut RunLog, mailer: &mut Mailer) -> bool {
    for job in &ctx.imports {
        if let Err(err) = import_branch(&ctx.central_import, &ctx.dist, &job.request(&ctx.import_post_hooks), log, mailer) {
            if report_failure(&ctx.name, &err, log, mailer, ctx.on_error) {
                return true;
            }
        }
    }
    false
}

fn run_export(ctx: &RepositoryContext, requested_branch: &Option<String>, log: &mut RunLog, mailer: &mut Mailer) -> bool {
    for job in &ctx.exports {
        if let Some(branch) = requested_branch {
            if &job.git_branch != branch {
                continue;
            }
        }
        let request = job.request(&ctx.name);
        if let Err(err) = export_branch(&job.central, &ctx.dist, &request, log) {
            if report_failure(&ctx.name, &err, log, mailer, ctx.on_error) {
                return true;
            }
        }
    }
    false
}

fn run_merge(ctx: &RepositoryContext, requested_branch: &Option<String>, log: &mut RunLog, mailer: &mut Mailer) -> bool {
    let sources: Vec<String> = ctx
        .merge_map
        .keys()
        .filter(|source| requested_branch.as_ref().map_or(true, |branch| *source == branch))
        .cloned()
        .collect();
    for source in sources {
        match merge_cascade(&ctx.dist, &ctx.merge_map, &ctx.import_post_hooks, &source, log, mailer) {
            Ok(failed) if !failed.is_empty() => {
                let err: SyncError = bigitr_core::error::MergeFailure { failed }.into();
                if report_failure(&ctx.name, &err, log, mailer, ctx.on_error) {
                    return true;
                }
            }
            Ok(_) => {}
            Err(err) => {
                let err: SyncError = err.into();
                if report_failure(&ctx.name, &err, log, mailer, ctx.on_error) {
                    return true;
                }
            }
        }
    }
    false
}
