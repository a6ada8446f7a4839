//! Building the augmented instruction sent to the model.

use std::fmt::Write;

use chrono::{Datelike, NaiveDate};

use crate::history::History;

/// Combine earlier instructions, the current one and today's date into a
/// single instruction.
///
/// When `history` carries a reused page it is appended last, as the starting
/// point for the new page.
pub fn compose_instruction(current: &str, history: &History, today: NaiveDate) -> String {
    let mut prompt = String::with_capacity(4096);

    if !history.instructions.is_empty() {
        let _ = writeln!(
            prompt,
            "The user previously generated a website using {} instruction{}.",
            history.instructions.len(),
            if history.instructions.len() == 1 { "" } else { "s" }
        );
        prompt.push_str("Please consider these instructions when processing the new website:\n");
        for instruction in &history.instructions {
            let _ = writeln!(prompt, "instruction: {}", instruction);
        }
        prompt.push('\n');
    }

    prompt.push_str("Process this instruction to generate the new website:\n");
    let _ = writeln!(prompt, "instruction: {}", current);
    let _ = writeln!(
        prompt,
        "\nPlease note that the current year is {} in case you need to generate copyright statements.",
        today.year()
    );

    if let Some(page) = &history.reused_page {
        prompt.push_str(
            "\nUse the following HTML page as a starting point to generate the new website:\n\n",
        );
        let _ = writeln!(prompt, "{}", page);
    }

    prompt
}
