// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prompt template rendering.
//!
//! Templates are markdown files under `<data_dir>/prompts/` with
//! `${name}` placeholders. When a template file is missing the bundled
//! default is used, so a fresh data directory works out of the box.

use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

/// Regex pattern for ${variable_name}
// Allow expect here as the regex is compile-time verified to be valid
#[allow(clippy::expect_used)]
static VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)\}").expect("constant regex pattern is valid")
});

/// Default prompt for task runs.
pub const DEFAULT_TASK_PROMPT: &str = "\
# Task ${task_id}: ${title}

${description}

Complete the task above. Commit your work when finished.

Previous review feedback (fix these first, if any):
${review_issues}
";

/// Default prompt for review runs.
pub const DEFAULT_REVIEW_PROMPT: &str = "\
# Review task ${task_id}: ${title}

${description}

An agent claims this task is complete. Inspect the changes below and
decide whether the work is actually done.

## git diff
${git_diff}

## git status
${git_status}

When you are done, print exactly one JSON object on its own line:
{\"result\": \"pass\"} or {\"result\": \"fail\", \"issues\": [\"...\"]}
";

/// Interpolate `${name}` placeholders with values from the vars map.
///
/// Unknown variables are left as-is.
pub fn interpolate(template: &str, vars: &HashMap<String, String>) -> String {
    VAR_PATTERN
        .replace_all(template, |caps: &regex::Captures| {
            let name = &caps[1];
            match vars.get(name) {
                Some(val) => val.clone(),
                None => caps[0].to_string(),
            }
        })
        .to_string()
}

/// Render the named prompt template with the given variables.
///
/// Looks for `<data_dir>/prompts/<name>.md` and falls back to `default`
/// when the file is missing or unreadable.
pub fn render_prompt(
    data_dir: &Path,
    name: &str,
    default: &str,
    vars: &HashMap<String, String>,
) -> String {
    let path = data_dir.join("prompts").join(format!("{name}.md"));
    let template = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(_) => default.to_string(),
    };
    interpolate(&template, vars)
}

#[cfg(test)]
#[path = "template_tests.rs"]
mod tests;
