//! Option questions such as "Are you sure? [yes/no]", asked through
//! [`PromptStep::choice`](super::PromptStep::choice).

use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Question {
    pub question: String,
    /// Allowed answers. Empty means free-form.
    pub options: Vec<String>,
    pub default_response: String,
    pub response: String,
    pub done: bool,
}

impl Question {
    pub fn new(question: impl Into<String>, options: Vec<String>, default_response: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            options: options.into_iter().filter(|o| !o.is_empty()).collect(),
            default_response: default_response.into(),
            response: String::new(),
            done: false,
        }
    }

    /// Records an answer. Blank input takes the default when there is one.
    /// With options, an exact case-insensitive match wins, otherwise the
    /// option sharing the longest prefix with the input. Input matching
    /// nothing leaves the question open.
    pub fn answer(&mut self, input: &str) {
        let input = input.trim();
        if input.is_empty() {
            if !self.default_response.is_empty() {
                self.response = self.default_response.clone();
                self.done = true;
            }
            return;
        }

        if self.options.is_empty() {
            self.response = input.to_string();
            self.done = true;
            return;
        }

        if let Some(option) = self.best_match(input) {
            self.response = option;
            self.done = true;
        }
    }

    fn best_match(&self, input: &str) -> Option<String> {
        let wanted = input.to_lowercase();
        let mut best: Option<(usize, &String)> = None;

        for option in &self.options {
            let candidate = option.to_lowercase();
            if candidate == wanted {
                return Some(option.clone());
            }
            let shared = candidate
                .chars()
                .zip(wanted.chars())
                .take_while(|(a, b)| a == b)
                .count();
            if shared > 0 && best.map_or(true, |(len, _)| shared > len) {
                best = Some((shared, option));
            }
        }

        best.map(|(_, option)| option.clone())
    }

    /// Throws the answer away so the question is asked again.
    pub fn reject_response(&mut self) {
        self.response.clear();
        self.done = false;
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.question)?;
        if !self.options.is_empty() {
            write!(f, " [{}]", self.options.join("/"))?;
        }
        write!(f, " ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yes_no() -> Question {
        Question::new("Are you sure?", vec!["yes".into(), "no".into(), String::new()], "")
    }

    #[test]
    fn test_empty_options_dropped() {
        assert_eq!(yes_no().options, vec!["yes", "no"]);
    }

    #[test]
    fn test_prefix_match() {
        let mut q = yes_no();
        q.answer("  Y ");
        assert!(q.done);
        assert_eq!(q.response, "yes");

        let mut q = yes_no();
        q.answer("maybe");
        assert!(!q.done);
        assert!(q.response.is_empty());
    }

    #[test]
    fn test_exact_match_beats_prefix() {
        let mut q = Question::new("Pick", vec!["northeast".into(), "north".into()], "");
        q.answer("NORTH");
        assert_eq!(q.response, "north");
    }

    #[test]
    fn test_blank_uses_default() {
        let mut q = yes_no();
        q.answer("");
        assert!(!q.done);

        let mut q = Question::new("Color?", Vec::new(), "blue");
        q.answer("   ");
        assert!(q.done);
        assert_eq!(q.response, "blue");

        q.reject_response();
        assert!(!q.done);
        assert!(q.response.is_empty());
    }

    #[test]
    fn test_free_form() {
        let mut q = Question::new("Name?", Vec::new(), "");
        q.answer(" Gandalf the Grey ");
        assert_eq!(q.response, "Gandalf the Grey");
    }

    #[test]
    fn test_display() {
        assert_eq!(yes_no().to_string(), "Are you sure? [yes/no] ");
        assert_eq!(Question::new("Name?", Vec::new(), "").to_string(), "Name? ");
    }
}
