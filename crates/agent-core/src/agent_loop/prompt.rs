//! Prompt templates for oracles backed by a language model.
//!
//! The system prompt fixes the action vocabulary and the human-in-the-loop
//! rules; the user message renders one [`OracleContext`].

use handoff_core_types::Action;
use handoff_privacy::text::truncate;

use crate::job::{HistoryEntry, HistoryEvent};
use crate::oracle::OracleContext;

/// Most recent history entries rendered into the user message.
const MAX_HISTORY_ENTRIES: usize = 25;
/// Failed signatures listed, most frequent first.
const MAX_FAILED_SIGNATURES: usize = 8;
const MAX_PAGE_TEXT: usize = 4000;

/// Default system prompt.
pub const JOB_SYSTEM_PROMPT: &str = r##"You are a browser automation agent working on behalf of a human. Each step you receive the goal, the history so far and the current page, and you answer with exactly ONE action.

## Available Actions

Respond with a single JSON object. The "type" field selects the action.

- navigate: {"type": "navigate", "url": "https://example.com/login"}
- fill: {"type": "fill", "selector": "#email", "value": "text to write", "sensitive": false}
- click: {"type": "click", "selector": "button[type=submit]"}
- submit: {"type": "submit", "selector": "form#login"}
- press: {"type": "press", "selector": "#otp", "key": "Enter"}
- scroll: {"type": "scroll", "direction": "down"}
- extract: {"type": "extract", "items": [{"title": "First result", "url": "/item/1"}]}
- request_input: {"type": "request_input", "kind": "password", "prompt": "Enter your password", "sensitive": true}
  - kind is one of: text, password, email, phone, otp
- complete: {"type": "complete", "summary": "what was achieved"}
- abort: {"type": "abort", "reason": "why the goal cannot be reached"}

## Human Input Rules

- NEVER invent credentials, codes or personal data. When the page needs a value you were not given, use request_input.
- Ask for one value at a time and wait for it before asking for the next.
- After the human answers, the value is shown once under "Human Value". Fill it into the matching field on the next step. It is not shown again after it has been written.
- Values for password and OTP fields are injected by the engine. You may put any placeholder in "value" for those fields.
- Do not request the same input twice while a value is still unused.

## Login Failures

If the context reports LOGIN FAILURE DETECTED, the credentials were rejected. ALWAYS request fresh credentials with request_input. Never retry the rejected value and never guess a different one.

## Repeated Failures

Actions listed under "Failed Actions" did not work. Repeating one of them is skipped without running it; try a different selector or approach.

## Results

When the goal asks you to collect information, report what you read with extract. Each item is a JSON object; relative "url" fields are resolved against the current page. Do not extract the same item twice. If a result budget is shown, the job finishes once it is met.

## Completion

Use complete once the goal is reached and verified. Use abort when the goal is impossible, for example when the human stopped answering.
"##;

pub fn format_system_prompt() -> String {
    JOB_SYSTEM_PROMPT.to_string()
}

/// Renders the per-step user message.
pub fn format_user_message(context: &OracleContext) -> String {
    let mut message = String::new();

    message.push_str("## Goal\n");
    message.push_str(&context.goal);
    message.push('\n');

    message.push_str(&format!("\n## Step\n{}\n", context.step));

    if !context.history.is_empty() {
        message.push_str("\n## History\n");
        let start = context.history.len().saturating_sub(MAX_HISTORY_ENTRIES);
        for entry in context.history.iter().skip(start) {
            message.push_str(&format!("- step {}: {}\n", entry.step, describe(entry)));
        }
    }

    if let Some(failure) = &context.credential_failure {
        message.push_str(&format!(
            "\n## LOGIN FAILURE DETECTED\nStep {} at {}: {}\nRequest fresh credentials from the human.\n",
            failure.step, failure.url, failure.reason
        ));
    }

    if let Some(request) = &context.request_context {
        message.push_str(&format!(
            "\n## Input Request\n{} ({}): {}\n",
            request.kind,
            if request.is_redacted() {
                "sensitive"
            } else {
                "plain"
            },
            request.prompt
        ));
    }

    if let Some(value) = &context.last_response {
        message.push_str("\n## Human Value\n");
        message.push_str(value);
        message.push_str("\nWrite this value into the matching field now.\n");
    }

    if context.results_collected > 0 || context.result_budget.is_some() {
        message.push_str("\n## Results\n");
        match context.result_budget {
            Some(budget) => message.push_str(&format!(
                "Collected {}/{} items.\n",
                context.results_collected, budget
            )),
            None => message.push_str(&format!(
                "Collected {} items.\n",
                context.results_collected
            )),
        }
    }

    if !context.failed_signatures.is_empty() {
        message.push_str("\n## Failed Actions\n");
        for (signature, count) in context.failed_signatures.iter().take(MAX_FAILED_SIGNATURES) {
            message.push_str(&format!("- {signature} (failed {count}x)\n"));
        }
    }

    message.push_str("\n## Current Page\n");
    match &context.page {
        Some(page) => {
            message.push_str(&format!("URL: {}\n", page.url));
            if let Some(title) = &page.title {
                message.push_str(&format!("Title: {title}\n"));
            }
            if let Some(error) = &page.error {
                message.push_str(&format!("Last error: {error}\n"));
            }
            message.push('\n');
            message.push_str(&truncate(&page.visible_text, MAX_PAGE_TEXT));
            message.push('\n');
        }
        None => message.push_str("(no page loaded yet)\n"),
    }

    message
}

fn describe(entry: &HistoryEntry) -> String {
    match &entry.event {
        HistoryEvent::ActionExecuted {
            action,
            url,
            success,
            error,
            human_value,
        } => {
            let outcome = if *success {
                "ok".to_string()
            } else {
                format!("failed: {}", error.as_deref().unwrap_or("unknown error"))
            };
            let source = if *human_value { " (human value)" } else { "" };
            format!("{}{} -> {} [{}]", describe_action(action), source, url, outcome)
        }
        HistoryEvent::ActionSkipped {
            signature,
            failures,
        } => format!("skipped {signature}, already failed {failures}x"),
        HistoryEvent::InputsCleared { url } => format!("cleared form inputs on {url}"),
        HistoryEvent::InputRequested { request } => {
            format!("requested {} input: {}", request.kind, request.prompt)
        }
        HistoryEvent::InputProvided { input_kind, value } => {
            format!("human provided {input_kind}: {value}")
        }
        HistoryEvent::InputTimedOut { input_kind } => {
            format!("human did not provide {input_kind} in time")
        }
        HistoryEvent::CredentialChecked { outcome, url, .. } => {
            format!("credential check {outcome} at {url}")
        }
        HistoryEvent::DriverFault { attempt, message } => {
            format!("driver fault on attempt {attempt}: {message}")
        }
        HistoryEvent::OracleFault { message } => format!("no action proposed: {message}"),
        HistoryEvent::ResultsExtracted { count, total } => {
            format!("extracted {count} items ({total} collected)")
        }
        HistoryEvent::Completed { summary } => {
            format!("completed: {}", summary.as_deref().unwrap_or(""))
        }
        HistoryEvent::Failed { reason } => format!("failed: {reason}"),
    }
}

fn describe_action(action: &Action) -> String {
    match action {
        Action::Fill {
            selector, value, ..
        } => format!("fill {selector} = \"{}\"", truncate(value, 40)),
        other => other.signature(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::CredentialOutcome;
    use crate::job::JobState;
    use handoff_core_types::{InputKind, InputRequest, JobId, PageSnapshot};

    #[test]
    fn system_prompt_lists_actions_and_rules() {
        let prompt = format_system_prompt();
        for action in ["navigate", "fill", "request_input", "complete", "abort"] {
            assert!(prompt.contains(action), "missing {action}");
        }
        assert!(prompt.contains("LOGIN FAILURE DETECTED"));
    }

    #[test]
    fn every_listed_action_example_parses() {
        let examples: Vec<&str> = JOB_SYSTEM_PROMPT
            .lines()
            .filter_map(|line| line.strip_prefix("- "))
            .filter_map(|line| line.split_once(": {").map(|(_, rest)| rest))
            .collect();
        assert_eq!(examples.len(), 10);
        for rest in examples {
            let json = format!("{{{rest}");
            let parsed = serde_json::from_str::<Action>(&json);
            assert!(parsed.is_ok(), "example does not parse: {json}: {parsed:?}");
        }
    }

    #[test]
    fn system_prompt_keeps_selector_examples_intact() {
        assert!(JOB_SYSTEM_PROMPT.contains(r##""selector": "#email""##));
        assert!(JOB_SYSTEM_PROMPT.ends_with("the human stopped answering.\n"));
    }

    #[test]
    fn results_progress_is_shown_against_the_budget() {
        let mut state =
            JobState::new(JobId::from("job"), "find five books").with_result_budget(Some(5));
        state.begin_step();
        state.record_results(vec![serde_json::json!({"title": "Dune"})]);
        let message = format_user_message(&OracleContext::from_state(&state));
        assert!(message.contains("Collected 1/5 items."));
        assert!(message.contains("extracted 1 items (1 collected)"));
    }

    #[test]
    fn user_message_shows_goal_and_page() {
        let mut state = JobState::new(JobId::from("job"), "Log in to the dashboard");
        state.begin_step();
        state.record_page(PageSnapshot::new("https://site/login", "Sign in").with_title("Login"));
        let message = format_user_message(&OracleContext::from_state(&state));
        assert!(message.contains("Log in to the dashboard"));
        assert!(message.contains("URL: https://site/login"));
        assert!(message.contains("Title: Login"));
        assert!(!message.contains("## Human Value"));
    }

    #[test]
    fn password_is_shown_once_and_history_is_masked() {
        let mut state = JobState::new(JobId::from("job"), "log in");
        state.begin_step();
        state
            .issue_request(InputRequest::new(InputKind::Password, "Password?"))
            .unwrap();
        state.record_response("S3cr3t!".into()).unwrap();

        let message = format_user_message(&OracleContext::from_state(&state));
        assert_eq!(message.matches("S3cr3t!").count(), 1);
        assert!(message.contains("[SENSITIVE PASSWORD PROVIDED]"));

        state.take_response();
        let message = format_user_message(&OracleContext::from_state(&state));
        assert!(!message.contains("S3cr3t!"));
    }

    #[test]
    fn login_failure_is_announced() {
        let mut state = JobState::new(JobId::from("job"), "log in");
        state.begin_step();
        state.record_credential_outcome(
            CredentialOutcome::Failure,
            "https://site/login?error=invalid",
            Some("url query 'error=invalid'".into()),
        );
        let message = format_user_message(&OracleContext::from_state(&state));
        assert!(message.contains("## LOGIN FAILURE DETECTED"));
        assert!(message.contains("Request fresh credentials"));
    }

    #[test]
    fn failed_signatures_are_capped() {
        let mut state = JobState::new(JobId::from("job"), "goal");
        for i in 0..12 {
            state.record_failed_action(format!("click|selector=#b{i}"));
        }
        let message = format_user_message(&OracleContext::from_state(&state));
        assert_eq!(message.matches("(failed 1x)").count(), MAX_FAILED_SIGNATURES);
    }
}
