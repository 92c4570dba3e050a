//! Gated interactive confirmation (C4).

use crate::errors::ControlFlowError;
use console::style;
use dialoguer::Confirm;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptLevel {
    None,
    Phase,
    Node,
    Critical,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PromptBoundary {
    Phase,
    Node,
    Critical,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PromptResponse {
    Continue,
    Skip,
    Pause,
    Abort,
}

pub struct Prompter {
    pub level: PromptLevel,
    /// When true, never actually reads from stdin; used by tests and
    /// `--yes`/non-interactive runs to always answer "continue".
    pub auto_continue: bool,
    /// A fixed, ordered list of answers to hand out instead of reading from
    /// stdin, consumed one boundary at a time. Lets tests drive a specific
    /// pause/skip/abort response deterministically without a tty.
    script: Option<std::cell::RefCell<std::collections::VecDeque<PromptResponse>>>,
}

impl Prompter {
    pub fn new(level: PromptLevel) -> Self {
        Self {
            level,
            auto_continue: false,
            script: None,
        }
    }

    /// Build a prompter that answers from `responses` in order rather than
    /// prompting interactively. A boundary with no script entry left falls
    /// back to `Continue`.
    pub fn scripted(level: PromptLevel, responses: Vec<PromptResponse>) -> Self {
        Self {
            level,
            auto_continue: false,
            script: Some(std::cell::RefCell::new(responses.into())),
        }
    }

    fn should_prompt(&self, boundary: PromptBoundary) -> bool {
        match self.level {
            PromptLevel::None => false,
            PromptLevel::Phase => boundary == PromptBoundary::Phase,
            PromptLevel::Node => matches!(boundary, PromptBoundary::Phase | PromptBoundary::Node),
            PromptLevel::Critical => boundary == PromptBoundary::Critical,
        }
    }

    /// Prompt at a boundary. Returns `Continue` immediately if this level
    /// does not gate this boundary.
    pub fn confirm(&self, boundary: PromptBoundary, message: &str) -> Result<PromptResponse, ControlFlowError> {
        if !self.should_prompt(boundary) || self.auto_continue {
            return Ok(PromptResponse::Continue);
        }

        if let Some(script) = &self.script {
            return Ok(script.borrow_mut().pop_front().unwrap_or(PromptResponse::Continue));
        }

        loop {
            let answer: String = dialoguer::Input::new()
                .with_prompt(format!(
                    "{message} [continue/skip/pause/abort/health/status]"
                ))
                .default("continue".to_string())
                .interact_text()
                .unwrap_or_else(|_| "continue".to_string());

            match answer.trim() {
                "continue" | "c" => return Ok(PromptResponse::Continue),
                "skip" | "s" => {
                    if boundary == PromptBoundary::Node {
                        return Ok(PromptResponse::Skip);
                    }
                    println!("skip is only valid at the node prompt level");
                    continue;
                }
                "pause" | "p" => return Ok(PromptResponse::Pause),
                "abort" | "a" => {
                    let confirmed = Confirm::new()
                        .with_prompt("Really abort the upgrade?")
                        .default(false)
                        .interact()
                        .unwrap_or(false);
                    if confirmed {
                        return Ok(PromptResponse::Abort);
                    }
                    continue;
                }
                "health" | "status" => {
                    println!("(status display omitted in this context)");
                    continue;
                }
                _ => {
                    println!("unrecognized response: {answer}");
                    continue;
                }
            }
        }
    }

    /// Always-shown failover dialog, independent of `level`.
    pub fn confirm_failover(&self, replica_set: &str, old_primary: &str) -> Result<bool, ControlFlowError> {
        if self.auto_continue || self.script.is_some() {
            return Ok(true);
        }
        println!(
            "{}",
            style(format!(
                "About to step down the primary ({old_primary}) of replica set '{replica_set}'. \
                 The set will be briefly unable to accept writes while a new primary is elected."
            ))
            .yellow()
            .bold()
        );
        Ok(Confirm::new()
            .with_prompt("Proceed with stepdown?")
            .default(false)
            .interact()
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_level_never_prompts() {
        let prompter = Prompter::new(PromptLevel::None);
        assert!(!prompter.should_prompt(PromptBoundary::Phase));
        assert!(!prompter.should_prompt(PromptBoundary::Node));
        assert!(!prompter.should_prompt(PromptBoundary::Critical));
    }

    #[test]
    fn phase_level_gates_only_phase_boundaries() {
        let prompter = Prompter::new(PromptLevel::Phase);
        assert!(prompter.should_prompt(PromptBoundary::Phase));
        assert!(!prompter.should_prompt(PromptBoundary::Node));
    }

    #[test]
    fn node_level_gates_phase_and_node_boundaries() {
        let prompter = Prompter::new(PromptLevel::Node);
        assert!(prompter.should_prompt(PromptBoundary::Phase));
        assert!(prompter.should_prompt(PromptBoundary::Node));
        assert!(!prompter.should_prompt(PromptBoundary::Critical));
    }

    #[test]
    fn critical_level_gates_only_critical_boundaries() {
        let prompter = Prompter::new(PromptLevel::Critical);
        assert!(!prompter.should_prompt(PromptBoundary::Phase));
        assert!(prompter.should_prompt(PromptBoundary::Critical));
    }

    #[test]
    fn auto_continue_short_circuits_any_gated_boundary() {
        let mut prompter = Prompter::new(PromptLevel::Node);
        prompter.auto_continue = true;
        let response = prompter.confirm(PromptBoundary::Node, "proceed?").unwrap();
        assert_eq!(response, PromptResponse::Continue);
    }

    #[test]
    fn auto_continue_approves_failover_without_blocking() {
        let mut prompter = Prompter::new(PromptLevel::Critical);
        prompter.auto_continue = true;
        assert!(prompter.confirm_failover("rs0", "localhost:27017").unwrap());
    }

    #[test]
    fn scripted_prompter_hands_out_responses_in_order() {
        let prompter = Prompter::scripted(PromptLevel::Node, vec![PromptResponse::Pause, PromptResponse::Skip]);
        assert_eq!(prompter.confirm(PromptBoundary::Node, "?").unwrap(), PromptResponse::Pause);
        assert_eq!(prompter.confirm(PromptBoundary::Node, "?").unwrap(), PromptResponse::Skip);
    }

    #[test]
    fn scripted_prompter_falls_back_to_continue_once_exhausted() {
        let prompter = Prompter::scripted(PromptLevel::Node, vec![PromptResponse::Skip]);
        prompter.confirm(PromptBoundary::Node, "?").unwrap();
        assert_eq!(prompter.confirm(PromptBoundary::Node, "?").unwrap(), PromptResponse::Continue);
    }

    #[test]
    fn scripted_prompter_approves_failover_without_blocking() {
        let prompter = Prompter::scripted(PromptLevel::Critical, vec![]);
        assert!(prompter.confirm_failover("rs0", "localhost:27017").unwrap());
    }
}
