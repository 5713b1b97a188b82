//! Prompt templates, one per stage.
//!
//! Prompts tell the model which artifact to write. The engine only trusts the
//! artifact, so every template names its output file explicitly.

use crate::artifacts::{QaPair, Question, TaskList};
use crate::review::ReviewCategory;

/// Largest diff embedded in a prompt, in bytes.
const MAX_DIFF_BYTES: usize = 60_000;

fn render_qa(pairs: &[QaPair]) -> String {
    if pairs.is_empty() {
        return "(none yet)".to_string();
    }
    pairs
        .iter()
        .map(|p| format!("Q: {}\nA: {}", p.question, p.answer))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn or_placeholder(text: &str, placeholder: &str) -> String {
    if text.trim().is_empty() {
        placeholder.to_string()
    } else {
        text.to_string()
    }
}

/// Cut a diff at a line boundary so prompts stay bounded.
pub fn truncate_diff(diff: &str) -> String {
    if diff.len() <= MAX_DIFF_BYTES {
        return diff.to_string();
    }
    let mut end = MAX_DIFF_BYTES;
    while !diff.is_char_boundary(end) {
        end -= 1;
    }
    let end = diff[..end].rfind('\n').unwrap_or(end);
    format!(
        "{}\n... (diff truncated, {} bytes omitted)",
        &diff[..end],
        diff.len() - end
    )
}

pub fn question_generation(
    description: &str,
    previous: &[QaPair],
    max_questions: u32,
    questions_file: &str,
) -> String {
    format!(
        r#"TASK: Write clarifying questions for this project to {questions_file}.

PROJECT DESCRIPTION:
{description}

ALREADY ANSWERED:
{answered}

Write valid JSON with at most {max_questions} new questions, using exactly this structure:
{{
  "questions": [
    {{"id": "q1", "question": "Your question here?", "options": ["Option 1", "Option 2"]}}
  ]
}}

Cover what is still unclear: platform, language, scale, integrations, deployment, data storage.
Do not repeat answered questions. If nothing is unclear, write {{"questions": []}}.
Do not ask for confirmation. Create the file now."#,
        description = or_placeholder(description, "(no description yet)"),
        answered = render_qa(previous),
    )
}

pub fn description_molding(description: &str, answers: &[QaPair], description_file: &str) -> String {
    format!(
        r#"You maintain the product description in {description_file}.

CURRENT DESCRIPTION:
{description}

ANSWERS FROM THE USER:
{answers}

Rewrite {description_file} as one coherent markdown document that folds in every answer.
Keep every requirement from the current description unless an answer contradicts it.
Replace the file wholesale. Do not write any other file."#,
        description = or_placeholder(description, "(empty)"),
        answers = render_qa(answers),
    )
}

pub fn task_planning(description: &str, answers: &[QaPair], tasks_file: &str) -> String {
    format!(
        r##"You are a software architect creating an implementation plan.

PROJECT DESCRIPTION:
{description}

USER ANSWERS TO CLARIFYING QUESTIONS:
{answers}

Write the plan to {tasks_file} as a markdown checklist under a "# Tasks" heading.

RULES:
1. Use `- [ ]` for each task
2. Order tasks by dependency, prerequisites first
3. Each task must be completable in one coding session
4. Include setup, implementation, testing and documentation tasks
5. No nested tasks"##,
        description = or_placeholder(description, "(empty)"),
        answers = render_qa(answers),
    )
}

pub fn execution(
    working_dir: &str,
    tasks: &TaskList,
    tasks_raw: &str,
    recent_changes: &str,
    tasks_per_iteration: u32,
) -> String {
    let next: Vec<String> = tasks
        .incomplete()
        .take(tasks_per_iteration as usize)
        .map(|t| format!("- {}", t.title))
        .collect();
    let limit = if tasks_per_iteration == 1 {
        "exactly ONE incomplete task".to_string()
    } else {
        format!("at most {} incomplete tasks", tasks_per_iteration)
    };
    format!(
        r#"You are an autonomous implementation agent working in {working_dir}.

RECENT CHANGES:
{recent}

CURRENT TASK LIST (tasks.md):
{tasks_raw}

NEXT UP:
{next}

INSTRUCTIONS:
1. Work on {limit}, in list order
2. Implement each task completely, including tests where it makes sense
3. Mark each finished task in tasks.md by changing `- [ ]` to `- [x]`
4. Append a short entry per change to recent-changes.md
5. If you discover necessary follow-up work, append it to tasks.md as new `- [ ]` items
6. If you cannot finish a task, leave it unchecked and explain why in recent-changes.md"#,
        recent = or_placeholder(recent_changes, "(nothing yet)"),
        next = next.join("\n"),
    )
}

pub fn unit_test_prep(diff: &str) -> String {
    format!(
        r#"Before code review starts, make sure the recent changes are covered by unit tests.

CHANGES UNDER REVIEW:
```diff
{diff}
```

Add or update unit tests for behavior introduced by these changes and run them.
Fix failing tests only when the failure is in the new code.
Append a short note of what you did to recent-changes.md."#,
        diff = truncate_diff(diff),
    )
}

pub fn reviewer(category: ReviewCategory, findings_file: &str, recent_changes: &str) -> String {
    let focus = category
        .focus_areas()
        .iter()
        .map(|a| format!("- {}", a))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"Review the recent code changes for {name} concerns.

Use `git diff` and the change log below to see what changed.

RECENT CHANGES:
{recent}

FOCUS ON:
{focus}

Write your findings to {findings_file}. For every issue give the file, the line if
applicable, a severity (High/Medium/Low) and a concrete fix.

If you find no issues, leave {findings_file} completely empty. Do not write praise
or "no issues found"; an empty file is the only way to report a clean review."#,
        name = category.display_name().to_uppercase(),
        recent = or_placeholder(recent_changes, "(not recorded)"),
    )
}

pub fn fixer(category: ReviewCategory, findings_file: &str, findings: &str) -> String {
    format!(
        r#"Fix the issues from the {name} review below.

FINDINGS ({findings_file}):
{findings}

Address every issue. Keep unrelated code unchanged.
Append a short entry per fix to recent-changes.md.
Do not edit {findings_file}; it is cleared automatically once you finish."#,
        name = category.display_name(),
    )
}

pub fn commit_message(status: &str, diff: &str, message_file: &str) -> String {
    format!(
        r#"Write a git commit message for the staged work to {message_file}.

GIT STATUS:
{status}

DIFF:
```diff
{diff}
```

Format: an imperative subject line under 72 characters, a blank line, then a short
body explaining what changed. Write ONLY {message_file}. Do not run git yourself."#,
        diff = truncate_diff(diff),
    )
}

pub fn error_fix(phase: &str, error: &str, expected_artifact: &str) -> String {
    format!(
        r#"The previous "{phase}" step failed to produce usable output.

ERROR:
{error}

EXPECTED ARTIFACT: {expected_artifact}

Inspect the working directory, find out what went wrong and produce a valid
{expected_artifact}. Do not change unrelated files."#
    )
}

pub fn client_message(message: &str, description: &str, tasks_raw: &str) -> String {
    format!(
        r#"The user sent a message while work was in progress.

MESSAGE:
{message}

PRODUCT DESCRIPTION (product-description.md):
{description}

TASK LIST (tasks.md):
{tasks_raw}

Act on the message:
- New work becomes new `- [ ]` items appended to tasks.md
- Changed requirements are folded into product-description.md
- Never uncheck or delete existing tasks"#,
        description = or_placeholder(description, "(empty)"),
    )
}

/// Questions rendered for logs and the status view.
pub fn summarize_questions(questions: &[Question]) -> String {
    questions
        .iter()
        .enumerate()
        .map(|(i, q)| format!("{}. {}", i + 1, q.question))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reviewer_prompt_names_findings_file_and_focus() {
        let prompt = reviewer(ReviewCategory::Safety, "review/safety.md", "");
        assert!(prompt.contains("review/safety.md"));
        assert!(prompt.contains("SAFETY"));
        assert!(prompt.contains("Path traversal"));
        assert!(prompt.contains("completely empty"));
    }

    #[test]
    fn execution_prompt_lists_next_tasks_up_to_limit() {
        let tasks = TaskList::parse("- [x] done\n- [ ] first\n- [ ] second\n- [ ] third\n");
        let prompt = execution("/work", &tasks, "raw", "", 2);
        assert!(prompt.contains("- first\n- second"));
        assert!(!prompt.contains("- third"));
        assert!(prompt.contains("at most 2"));
    }

    #[test]
    fn long_diffs_are_truncated_on_a_line_boundary() {
        let line = "+ some added line of code\n";
        let diff = line.repeat(MAX_DIFF_BYTES / line.len() + 100);
        let cut = truncate_diff(&diff);
        assert!(cut.len() < diff.len());
        assert!(cut.contains("diff truncated"));
        assert!(cut.lines().rev().nth(1).unwrap().starts_with("+ some"));
    }

    #[test]
    fn planning_prompt_asks_for_tasks_heading_and_checkboxes() {
        let prompt = task_planning("todo app", &[], "tasks.md");
        assert!(prompt.contains(r##"under a "# Tasks" heading"##));
        assert!(prompt.contains("Use `- [ ]` for each task"));
        assert!(prompt.ends_with("5. No nested tasks"));
    }

    #[test]
    fn question_prompt_includes_previous_answers() {
        let prompt = question_generation(
            "todo app",
            &[QaPair {
                question: "Platform?".into(),
                answer: "web".into(),
            }],
            5,
            "questions.json",
        );
        assert!(prompt.contains("Q: Platform?\nA: web"));
        assert!(prompt.contains("at most 5"));
    }
}
