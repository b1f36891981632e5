use std::fmt::Write as _;

use dialoguer::console::style;

use crate::codex::api::Issue;

/// Renders rejected-codex issues as a bulleted list with source excerpts.
pub fn format_issues(issues: &[Issue]) -> String {
    let mut out = String::new();
    for issue in issues {
        let location = match &issue.source_position {
            Some(position) => format!("{} at {position}", issue.kind),
            None => issue.kind.clone(),
        };
        let _ = writeln!(out, "- {} ({})", issue.message, style(location).dim());
        for line in &issue.context_lines {
            let _ = writeln!(out, "  {} {line}", style(">").dim());
        }
    }
    out
}

pub fn print_issues(issues: &[Issue]) {
    eprint!("{}", format_issues(issues));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_with_and_without_context() {
        dialoguer::console::set_colors_enabled(false);
        let issues = vec![
            Issue {
                kind: "UnknownDirective".into(),
                message: "unknown directive: foo".into(),
                source_position: Some("cell 3, line 2".into()),
                context_lines: vec!["```{foo}".into(), "bar".into()],
            },
            Issue {
                kind: "Other".into(),
                message: "plain".into(),
                source_position: None,
                context_lines: Vec::new(),
            },
        ];

        assert_eq!(
            format_issues(&issues),
            "- unknown directive: foo (UnknownDirective at cell 3, line 2)\n  > ```{foo}\n  > bar\n- plain (Other)\n"
        );
    }
}
