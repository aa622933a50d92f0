//! MergeCascader (§4.10): depth-first fan-out of a source branch through
//! `mergeMap`, fast-forwarding each target from origin and attempting a
//! three-way merge; failures in one subtree do not stop the others.

use std::collections::HashMap;

use bigitr_core::error::ExitCodeError;
use bigitr_core::runlog::RunLog;
use bigitr_notify::Mailer;
use bigitr_vcs::DistDriver;

/// Recursively merges `source` into every branch `mergeMap` maps it to, and
/// so on transitively. Returns the list of branches where the three-way
/// merge produced a conflict (empty means the whole cascade succeeded).
/// `checkout`/`mergeFastForward` failures are fatal and propagate as
/// `ExitCodeError` — only `mergeDefault` conflicts are cascade-local
/// failures that do not abort sibling subtrees.
///
/// `import_post_hooks` maps each cascade target branch to its
/// `posthook.git.imp.<branch>` list (§4.10: `push(origin, T, T);
/// runImpPostHooks(T)`), run once the push to `T` lands and before recursing
/// into `T`'s own targets.
pub fn merge_cascade(
    dist: &DistDriver,
    merge_map: &HashMap<String, Vec<String>>,
    import_post_hooks: &HashMap<String, Vec<String>>,
    source: &str,
    log: &mut RunLog,
    mailer: &mut Mailer,
) -> Result<Vec<String>, ExitCodeError> {
    let mut failed = Vec::new();
    dist.pristine(log)?;
    let Some(targets) = merge_map.get(source) else {
        return Ok(failed);
    };
    for target in targets {
        dist.checkout(log, target)?;
        let origin_ref = format!("origin/{target}");
        dist.merge_fast_forward(log, &origin_ref)?;

        let message = format!("Automated merge '{source}' into '{target}'");
        let rc = dist.merge_default(log, source, &message)?;
        if rc != 0 {
            if let Ok(segment) = log.last_output() {
                mailer.add_attachment(
                    &segment.stdout.unwrap_or_default(),
                    &format!("output from {message}"),
                );
                mailer.add_attachment(
                    &segment.stderr.unwrap_or_default(),
                    &format!("errors from {message}"),
                );
            }
            failed.push(target.clone());
        } else {
            dist.push(log, "origin", target, target)?;
            if let Some(hooks) = import_post_hooks.get(target) {
                dist.run_hooks(log, hooks)?;
            }
            let nested = merge_cascade(dist, merge_map, import_post_hooks, target, log, mailer)?;
            failed.extend(nested);
        }
    }
    Ok(failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_merge_map_entry_is_a_noop() {
        let map: HashMap<String, Vec<String>> = HashMap::new();
        assert!(map.get("cvs-b1").is_none());
    }
}
