//! Multi-step prompt dialogs.
//!
//! A dialog is a list of [`PromptStep`]s. The handler returned by
//! [`prompt_handler`] keeps its progress in [`SharedState::prompt`]:
//! the first call creates the state and sends the first applicable
//! prompt, later calls buffer keystrokes until enter and then validate.
//! Three failed answers to the same step end the session.

use super::login::LoginRules;
use super::question::Question;
use super::{ClientInput, Disconnect, InputHandler, SharedState};
use crate::protocol::telnet::CRLF;
use lantern_event_system::WebClientCommand;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Answers collected so far, keyed by step id.
pub type Results = HashMap<String, String>;
pub type Validator = Arc<dyn Fn(&str, &Results) -> Result<String, String> + Send + Sync>;
pub type Condition = Arc<dyn Fn(&Results) -> bool + Send + Sync>;
pub type PromptText = Arc<dyn Fn(&Results) -> String + Send + Sync>;
/// Called once with every answer. Its return value is the handler's.
pub type CompletionFn = Arc<dyn Fn(&Results, &mut SharedState) -> bool + Send + Sync>;

pub const MAX_FAILURES: u32 = 3;
pub const DEFAULT_MASK_GLYPH: &str = "*";
pub const PASSWORD_NEW: &str = "password-new";
pub const PASSWORD_NEW_VERIFY: &str = "password-new-verify";

pub const TOO_MANY_MISTAKES: &str = "\r\nToo many mistakes.\r\n\r\n";

#[derive(Clone)]
pub struct PromptStep {
    pub id: String,
    pub mask_input: bool,
    pub mask_glyph: String,
    prompt: PromptText,
    validator: Validator,
    condition: Option<Condition>,
}

impl fmt::Debug for PromptStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptStep")
            .field("id", &self.id)
            .field("mask_input", &self.mask_input)
            .field("conditional", &self.condition.is_some())
            .finish()
    }
}

impl PromptStep {
    /// A step with a fixed prompt that accepts any non-empty answer.
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        Self {
            id: id.into(),
            mask_input: false,
            mask_glyph: DEFAULT_MASK_GLYPH.to_string(),
            prompt: Arc::new(move |_| prompt.clone()),
            validator: Arc::new(default_validator),
            condition: None,
        }
    }

    /// A step asked as a [`Question`]. The prompt lists the options, an
    /// answer is matched against them by prefix and blank input takes the
    /// default.
    pub fn choice(id: impl Into<String>, question: Question) -> Self {
        let text = question.to_string();
        Self::new(id, text).validator(move |input, _| {
            let mut question = question.clone();
            question.answer(input);
            if question.done {
                Ok(question.response)
            } else if question.options.is_empty() {
                Err("input required".to_string())
            } else {
                Err(format!("please answer {}", question.options.join(" or ")))
            }
        })
    }

    /// Builds the prompt from earlier answers.
    pub fn prompt_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&Results) -> String + Send + Sync + 'static,
    {
        self.prompt = Arc::new(f);
        self
    }

    pub fn masked(mut self) -> Self {
        self.mask_input = true;
        self
    }

    pub fn mask_glyph(mut self, glyph: impl Into<String>) -> Self {
        self.mask_glyph = glyph.into();
        self
    }

    pub fn validator<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &Results) -> Result<String, String> + Send + Sync + 'static,
    {
        self.validator = Arc::new(f);
        self
    }

    /// Only ask this step when `f` holds for the answers so far.
    pub fn condition<F>(mut self, f: F) -> Self
    where
        F: Fn(&Results) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(f));
        self
    }

    pub fn applies(&self, results: &Results) -> bool {
        self.condition.as_ref().map_or(true, |c| c(results))
    }

    pub fn prompt_text(&self, results: &Results) -> String {
        (self.prompt)(results)
    }

    pub fn validate(&self, input: &str, results: &Results) -> Result<String, String> {
        (self.validator)(input, results)
    }
}

/// Progress through one dialog.
pub struct PromptState {
    steps: Arc<Vec<PromptStep>>,
    current: usize,
    results: Results,
    failures: Vec<u32>,
    on_complete: CompletionFn,
}

impl fmt::Debug for PromptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptState")
            .field("current", &self.current)
            .field("steps", &self.steps.len())
            .field("answered", &self.results.keys().collect::<Vec<_>>())
            .field("failures", &self.failures)
            .finish()
    }
}

impl PromptState {
    fn new(steps: Arc<Vec<PromptStep>>, on_complete: CompletionFn) -> Self {
        let failures = vec![0; steps.len()];
        Self {
            steps,
            current: 0,
            results: Results::new(),
            failures,
            on_complete,
        }
    }

    pub fn current_step(&self) -> Option<&PromptStep> {
        self.steps.get(self.current)
    }

    pub fn results(&self) -> &Results {
        &self.results
    }

    pub fn failures(&self, step_id: &str) -> u32 {
        self.steps
            .iter()
            .position(|s| s.id == step_id)
            .map_or(0, |idx| self.failures[idx])
    }

    /// Moves to the first applicable step at or after `from` and sends its
    /// prompt. Returns true when no step is left.
    fn advance_from(&mut self, from: usize, shared: &mut SharedState) -> bool {
        for idx in from..self.steps.len() {
            if self.steps[idx].applies(&self.results) {
                self.current = idx;
                self.send_prompt(shared);
                return false;
            }
            debug!("Skipping prompt step {} for connection {}", self.steps[idx].id, shared.connection_id());
        }
        self.current = self.steps.len();
        true
    }

    fn send_prompt(&self, shared: &mut SharedState) {
        let Some(step) = self.steps.get(self.current) else {
            return;
        };
        shared.send(step.prompt_text(&self.results));

        if shared.record.is_framed() {
            let text = if step.mask_input { "TEXTMASK:true" } else { "TEXTMASK:false" };
            shared.emit(WebClientCommand {
                connection_id: shared.connection_id(),
                text: text.to_string(),
            });
        }
    }

    fn complete(self, shared: &mut SharedState) -> bool {
        debug!("Prompt sequence completed for connection {}", shared.connection_id());
        (self.on_complete)(&self.results, shared)
    }
}

/// Builds the input handler that drives `steps`.
pub fn prompt_handler(steps: Vec<PromptStep>, on_complete: CompletionFn) -> InputHandler {
    let steps = Arc::new(steps);
    Arc::new(move |input: &mut ClientInput, shared: &mut SharedState| {
        let Some(mut state) = shared.prompt.take() else {
            let mut state = PromptState::new(steps.clone(), on_complete.clone());
            if state.advance_from(0, shared) {
                warn!("Prompt sequence for connection {} had no applicable steps", shared.connection_id());
                return state.complete(shared);
            }
            shared.prompt = Some(state);
            return false;
        };

        let steps = state.steps.clone();
        let Some(step) = steps.get(state.current) else {
            error!(
                "Prompt state for connection {} points past its last step ({} of {})",
                shared.connection_id(),
                state.current,
                steps.len()
            );
            shared.request_disconnect(Disconnect::Remove);
            return false;
        };

        if !input.enter_pressed {
            if !input.bs_pressed && input.data_in.first().is_some_and(|&b| b >= 32) {
                if step.mask_input {
                    let count = String::from_utf8_lossy(&input.data_in).chars().count();
                    shared.send(step.mask_glyph.repeat(count));
                } else {
                    shared.send(input.data_in.clone());
                }
            }
            shared.prompt = Some(state);
            return false;
        }

        if shared.record.is_framed() {
            shared.send(input.buffer.clone());
        }
        shared.send(CRLF);
        let submitted = String::from_utf8_lossy(&input.buffer).trim().to_string();
        input.buffer.clear();

        match step.validate(&submitted, &state.results) {
            Ok(value) => {
                debug!("Prompt step {} accepted for connection {}", step.id, shared.connection_id());
                state.results.insert(step.id.clone(), value);
                let next = state.current + 1;
                if state.advance_from(next, shared) {
                    return state.complete(shared);
                }
                shared.prompt = Some(state);
                false
            }
            Err(message) => {
                shared.send(message);
                shared.send(CRLF);

                if step.id == PASSWORD_NEW_VERIFY {
                    if let Some(idx) = steps.iter().position(|s| s.id == PASSWORD_NEW) {
                        state.current = idx;
                    }
                }

                state.failures[state.current] += 1;
                if state.failures[state.current] >= MAX_FAILURES {
                    shared.send(TOO_MANY_MISTAKES);
                    shared.request_disconnect(Disconnect::Remove);
                    return false;
                }

                state.send_prompt(shared);
                shared.prompt = Some(state);
                false
            }
        }
    })
}

// ============================================================================
// Validators
// ============================================================================

pub fn default_validator(input: &str, _results: &Results) -> Result<String, String> {
    if input.is_empty() {
        return Err("input required".to_string());
    }
    Ok(input.to_string())
}

/// Accepts `new` or anything long enough to be an existing name.
pub fn validate_new_entry(input: &str, rules: &LoginRules) -> Result<String, String> {
    if input.eq_ignore_ascii_case("new") {
        return Ok("new".to_string());
    }
    if input.chars().count() < rules.name_min {
        return Err("try again.".to_string());
    }
    Ok(input.to_string())
}

pub fn validate_username(input: &str, rules: &LoginRules) -> Result<String, String> {
    let len = input.chars().count();
    if len < rules.name_min || len > rules.name_max {
        return Err(format!(
            "name must be between {} and {} characters long",
            rules.name_min, rules.name_max
        ));
    }
    if input.eq_ignore_ascii_case("new") {
        return Err("that name is reserved".to_string());
    }
    let mut chars = input.chars();
    let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    if !starts_with_letter || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err("names must start with a letter and contain only letters, numbers and underscores".to_string());
    }
    Ok(input.to_string())
}

pub fn validate_password(input: &str, rules: &LoginRules) -> Result<String, String> {
    let len = input.chars().count();
    if len < rules.password_min || len > rules.password_max {
        return Err(format!(
            "password must be between {} and {} characters long",
            rules.password_min, rules.password_max
        ));
    }
    Ok(input.to_string())
}

pub fn validate_password_verify(input: &str, results: &Results) -> Result<String, String> {
    if results.get(PASSWORD_NEW).map(String::as_str) != Some(input) {
        return Err("your passwords did not match".to_string());
    }
    Ok(input.to_string())
}

/// Empty is fine unless the rules require an address.
pub fn validate_email(input: &str, rules: &LoginRules) -> Result<String, String> {
    if input.is_empty() {
        if rules.email_required {
            return Err("input required".to_string());
        }
        return Ok(String::new());
    }

    let valid = match input.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !input.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(format!("{} is not a valid email address", input));
    }
    Ok(input.to_string())
}

/// `yes`/`no` matched by prefix, answered as `y` or `n`. Empty means no.
pub fn validate_yes_no(input: &str, _results: &Results) -> Result<String, String> {
    let mut question = Question::new("", vec!["yes".to_string(), "no".to_string()], "no");
    question.answer(input);
    match question.response.chars().next() {
        Some(first) if question.done => Ok(first.to_string()),
        _ => Err("invalid response".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results(pairs: &[(&str, &str)]) -> Results {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_default_and_yes_no() {
        assert!(default_validator("", &Results::new()).is_err());
        assert_eq!(default_validator("bob", &Results::new()), Ok("bob".into()));

        assert_eq!(validate_yes_no("", &Results::new()), Ok("n".into()));
        assert_eq!(validate_yes_no("Yes please", &Results::new()), Ok("y".into()));
        assert_eq!(validate_yes_no("nope", &Results::new()), Ok("n".into()));
        assert_eq!(validate_yes_no("maybe", &Results::new()), Err("invalid response".into()));
    }

    #[test]
    fn test_choice_step() {
        let step = PromptStep::choice(
            "class",
            Question::new("Pick a class:", vec!["warrior".into(), "wizard".into()], ""),
        );
        let answers = Results::new();
        assert_eq!(step.prompt_text(&answers), "Pick a class: [warrior/wizard] ");
        assert_eq!(step.validate("WIZ", &answers), Ok("wizard".into()));
        assert_eq!(step.validate("warrior", &answers), Ok("warrior".into()));
        assert_eq!(
            step.validate("", &answers),
            Err("please answer warrior or wizard".into())
        );

        let free = PromptStep::choice("motto", Question::new("Motto?", Vec::new(), ""));
        assert_eq!(free.validate("", &answers), Err("input required".into()));
        assert_eq!(free.validate(" onward ", &answers), Ok("onward".into()));
    }

    #[test]
    fn test_login_validators() {
        let rules = LoginRules::default();
        assert_eq!(validate_new_entry("NEW", &rules), Ok("new".into()));
        assert_eq!(validate_new_entry("a", &rules), Err("try again.".into()));
        assert!(validate_username("bob_2", &rules).is_ok());
        assert!(validate_username("2bob", &rules).is_err());
        assert!(validate_username("b", &rules).is_err());
        assert!(validate_username("new", &rules).is_err());
        assert!(validate_password("abc", &rules).is_err());
        assert!(validate_password("secret", &rules).is_ok());
    }

    #[test]
    fn test_password_verify() {
        let answers = results(&[(PASSWORD_NEW, "hunter22")]);
        assert!(validate_password_verify("hunter22", &answers).is_ok());
        assert_eq!(
            validate_password_verify("hunter23", &answers),
            Err("your passwords did not match".into())
        );
    }

    #[test]
    fn test_email() {
        let mut rules = LoginRules::default();
        assert_eq!(validate_email("", &rules), Ok(String::new()));
        assert!(validate_email("bob@example.com", &rules).is_ok());
        assert!(validate_email("bob@example", &rules).is_err());
        assert!(validate_email("@example.com", &rules).is_err());
        assert!(validate_email("bob smith@example.com", &rules).is_err());

        rules.email_required = true;
        assert!(validate_email("", &rules).is_err());
    }

    #[test]
    fn test_step_condition() {
        let step = PromptStep::new("email", "Email: ").condition(|r| r.get("username").map(String::as_str) == Some("new"));
        assert!(step.applies(&results(&[("username", "new")])));
        assert!(!step.applies(&results(&[("username", "bob")])));
        assert!(PromptStep::new("any", "?").applies(&Results::new()));
    }

    #[test]
    fn test_dynamic_prompt_text() {
        let step = PromptStep::new("confirm", "").prompt_with(|r| {
            format!("Create {}? [y/n] ", r.get("username").map(String::as_str).unwrap_or("?"))
        });
        assert_eq!(step.prompt_text(&results(&[("username", "bob")])), "Create bob? [y/n] ");
    }
}
