//! Markdown task description handed to every delivery target.

use harness_core::types::{CodeFix, RemediationAnalysis};

use crate::types::ErrorDigest;

const FIX_PREVIEW_CHARS: usize = 500;

/// First `limit` characters of `text`, with `...` appended when cut.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((byte_index, _)) => format!("{}...", &text[..byte_index]),
        None => text.to_string(),
    }
}

pub fn render_task_prompt(
    errors: &[ErrorDigest],
    analysis: &RemediationAnalysis,
    fixes: &[CodeFix],
) -> String {
    let mut out = String::from("## Task: Fix E2E Test Failure\n\n### Error Summary\n");

    for error in errors {
        out.push_str(&format!(
            "\n**{} - Step {} ({})**\n- Error: {}\n",
            error.scenario_id, error.step_index, error.step_type, error.message
        ));
        if let Some(expected) = &error.expected {
            out.push_str(&format!("- Expected: {expected}\n"));
        }
        if let Some(actual) = &error.actual {
            out.push_str(&format!("- Actual: {actual}\n"));
        }
    }

    out.push_str(&format!(
        "\n### Root Cause Analysis\n{}\n\n### Suggested Approach\n{}\n\n### Affected Files\n",
        analysis.root_cause, analysis.suggested_approach
    ));
    for file in &analysis.affected_files {
        out.push_str(&format!("- {file}\n"));
    }

    if !fixes.is_empty() {
        out.push_str("\n### Suggested Fixes\n");
        for fix in fixes {
            out.push_str(&format!(
                "\n#### {}\n{}\n\n```\n{}\n```\n",
                fix.file,
                fix.explanation,
                truncate_chars(&fix.fixed_content, FIX_PREVIEW_CHARS)
            ));
        }
    }

    out.push_str(
        "\n### Instructions\n\
1. Analyze the root cause of this test failure\n\
2. Implement a fix that addresses the issue\n\
3. Ensure the fix doesn't break other functionality\n\
4. Re-run the test to verify the fix\n\
\n### Constraints\n\
- Maintain existing API contracts\n\
- Follow the codebase's existing patterns\n\
- Don't modify test expectations unless they were incorrect\n",
    );
    out
}
