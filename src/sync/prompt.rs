use crate::error::{errors, SnResult, SnSyncError};
use colored::Colorize;
use console::Term;
use dialoguer::{Confirm, Input};

/// Questions the sync engine may ask during a pull
pub trait Prompter: Send + Sync {
    fn is_interactive(&self) -> bool;

    /// Choose which referenced tables to register for schema capture.
    fn select_references(&self, missing: &[String]) -> SnResult<Vec<String>>;

    /// Context tags for the records of an ad-hoc filtered pull.
    fn context_tags(&self, table: &str, record_count: usize) -> SnResult<Vec<String>>;
}

/// Never asks anything; used when stdout is not a terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct NonInteractive;

impl Prompter for NonInteractive {
    fn is_interactive(&self) -> bool {
        false
    }

    fn select_references(&self, _missing: &[String]) -> SnResult<Vec<String>> {
        Ok(Vec::new())
    }

    fn context_tags(&self, _table: &str, _record_count: usize) -> SnResult<Vec<String>> {
        Ok(Vec::new())
    }
}

/// dialoguer prompts on the controlling terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    /// Terminal prompts when stdout is a terminal, silence otherwise
    pub fn detect() -> Box<dyn Prompter> {
        if Term::stdout().is_term() {
            Box::new(TerminalPrompter)
        } else {
            Box::new(NonInteractive)
        }
    }
}

fn prompt_error(err: dialoguer::Error) -> SnSyncError {
    errors::validation_error(format!("Prompt failed: {err}"), None, None)
}

impl Prompter for TerminalPrompter {
    fn is_interactive(&self) -> bool {
        Term::stdout().is_term()
    }

    fn select_references(&self, missing: &[String]) -> SnResult<Vec<String>> {
        println!(
            "\n      🤔 Found {} referenced tables without context:",
            missing.len()
        );
        for table in missing {
            println!("         - {}", table.cyan());
        }

        let answer: String = Input::new()
            .with_prompt("      ❓ Add their context to sn-config.json? (y/n/select)")
            .allow_empty(true)
            .interact_text()
            .map_err(prompt_error)?;

        match parse_reference_answer(&answer) {
            ReferenceAnswer::All => Ok(missing.to_vec()),
            ReferenceAnswer::Nothing => Ok(Vec::new()),
            ReferenceAnswer::Select => {
                let picked: String = Input::new()
                    .with_prompt("      ✍️  Enter tables separated by comma (e.g. sys_user, cmn_location)")
                    .allow_empty(true)
                    .interact_text()
                    .map_err(prompt_error)?;
                Ok(pick_references(&picked, missing))
            }
        }
    }

    fn context_tags(&self, _table: &str, record_count: usize) -> SnResult<Vec<String>> {
        println!("\n   🤖 Custom pull detected for {} records.", record_count);
        let wanted = Confirm::new()
            .with_prompt("      Do you want to add/update AI Context tags for these records?")
            .default(false)
            .interact()
            .map_err(prompt_error)?;
        if !wanted {
            return Ok(Vec::new());
        }
        let input: String = Input::new()
            .with_prompt("      Enter context tag(s) (comma separated, e.g. \"Hackathon,Auth\")")
            .allow_empty(true)
            .interact_text()
            .map_err(prompt_error)?;
        Ok(split_list(&input))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceAnswer {
    All,
    Nothing,
    Select,
}

/// `y`/`yes`/`s` add all, `select` asks for a list, anything else adds none.
pub fn parse_reference_answer(answer: &str) -> ReferenceAnswer {
    match answer.trim().to_lowercase().as_str() {
        "y" | "yes" | "s" => ReferenceAnswer::All,
        "select" => ReferenceAnswer::Select,
        _ => ReferenceAnswer::Nothing,
    }
}

/// Entries of a comma list that are among the offered tables, in input order
pub fn pick_references(input: &str, offered: &[String]) -> Vec<String> {
    let mut picked = Vec::new();
    for table in split_list(input) {
        if offered.contains(&table) && !picked.contains(&table) {
            picked.push(table);
        }
    }
    picked
}

/// Trimmed, non-empty entries of a comma-separated list
pub fn split_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_answers() {
        assert_eq!(parse_reference_answer(" Y "), ReferenceAnswer::All);
        assert_eq!(parse_reference_answer("s"), ReferenceAnswer::All);
        assert_eq!(parse_reference_answer("SELECT"), ReferenceAnswer::Select);
        assert_eq!(parse_reference_answer(""), ReferenceAnswer::Nothing);
        assert_eq!(parse_reference_answer("n"), ReferenceAnswer::Nothing);
    }

    #[test]
    fn picked_references_must_have_been_offered() {
        let offered = vec!["sys_user".to_string(), "cmn_location".to_string()];
        assert_eq!(
            pick_references("cmn_location, bogus,,sys_user, cmn_location", &offered),
            vec!["cmn_location".to_string(), "sys_user".to_string()]
        );
    }
}
