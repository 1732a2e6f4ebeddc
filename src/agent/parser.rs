//! Action Parser (C4).
//!
//! Parses an assistant's textual response into an ordered list of
//! [`Action`]s plus an optional `TASK_COMPLETED` sentinel.
//!
//! Grammar (line-oriented, delimiter-based):
//!
//! ```text
//! ACTION: <TOOL_ID>
//! <KEY>: <value-first-line>
//! <continuation-lines>
//! ...
//! ---END---
//! ```
//!
//! `ACTION:` opens a block, `---END---` closes it; text outside blocks is
//! ignored. A key's value continues until the next `KEY:` line or the
//! terminator, so `CONTENT`/`CODE` fields may span blank lines. A block with
//! no terminator or an unparseable key line is rejected with a parse error,
//! but later valid blocks in the same response still execute (§4.4).

use std::collections::HashMap;

use crate::action::{Action, ParseOutcome};

const ACTION_PREFIX: &str = "ACTION:";
const BLOCK_TERMINATOR: &str = "---END---";
const TASK_COMPLETED_TOOL: &str = "TASK_COMPLETED";

/// A line is a `KEY: value` header if it starts with an uppercase-led
/// identifier (letters, digits, underscore) immediately followed by `:`.
fn key_line(line: &str) -> Option<(String, String)> {
    let colon = line.find(':')?;
    let (key, rest) = line.split_at(colon);
    let key = key.trim();
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    if !key.chars().next()?.is_ascii_uppercase() {
        return None;
    }
    let value = rest[1..].trim_start_matches(' ');
    Some((key.to_string(), value.to_string()))
}

/// Parse the assistant's response into actions plus an optional terminal
/// message. Malformed blocks are isolated: one bad block never prevents
/// later valid blocks from executing.
pub fn parse_response(content: &str) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    let lines: Vec<&str> = content.lines().collect();
    let mut i = 0usize;
    let mut seq_index = 0usize;

    while i < lines.len() {
        let line = lines[i].trim_end();
        if let Some(rest) = line.trim_start().strip_prefix(ACTION_PREFIX) {
            let tool = rest.trim().to_string();
            let block_start = i;
            i += 1;

            let mut params: HashMap<String, String> = HashMap::new();
            let mut current_key: Option<String> = None;
            let mut terminated = false;
            let mut raw_lines = vec![line.to_string()];

            while i < lines.len() {
                let candidate = lines[i];
                if candidate.trim() == BLOCK_TERMINATOR {
                    raw_lines.push(candidate.to_string());
                    i += 1;
                    terminated = true;
                    break;
                }
                if candidate.trim_start().starts_with(ACTION_PREFIX) {
                    // A new ACTION block opened before this one terminated:
                    // the current block is malformed; do not consume the
                    // new block's opening line.
                    break;
                }
                raw_lines.push(candidate.to_string());
                match key_line(candidate) {
                    Some((key, value)) => {
                        params.insert(key.clone(), value);
                        current_key = Some(key);
                    }
                    None => {
                        if let Some(ref key) = current_key {
                            let entry = params.entry(key.clone()).or_default();
                            entry.push('\n');
                            entry.push_str(candidate);
                        }
                        // Continuation lines before any key are prose and
                        // are dropped.
                    }
                }
                i += 1;
            }

            if tool.is_empty() {
                outcome
                    .parse_errors
                    .push(format!("block at line {block_start}: missing tool identifier"));
                continue;
            }

            if !terminated {
                outcome
                    .parse_errors
                    .push(format!("block at line {block_start}: missing {BLOCK_TERMINATOR}"));
                continue;
            }

            if tool == TASK_COMPLETED_TOOL {
                let message = params.get("MESSAGE").cloned().unwrap_or_default();
                outcome.task_completed_message = Some(message);
            }

            outcome.actions.push(Action {
                tool,
                params,
                raw: raw_lines.join("\n"),
                seq_index,
            });
            seq_index += 1;
            continue;
        }

        if let Some(rest) = line.trim_start().strip_prefix(&format!("{TASK_COMPLETED_TOOL}:")) {
            outcome.task_completed_message = Some(rest.trim().to_string());
        } else if line.trim() == TASK_COMPLETED_TOOL {
            outcome.task_completed_message.get_or_insert_with(String::new);
        }

        i += 1;
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_action() {
        let text = "ACTION: CREATE_FILE\nPATH: hello.py\nCONTENT: print('hi')\n---END---";
        let out = parse_response(text);
        assert_eq!(out.actions.len(), 1);
        assert_eq!(out.actions[0].tool, "CREATE_FILE");
        assert_eq!(out.actions[0].param("PATH"), Some("hello.py"));
        assert_eq!(out.actions[0].param("CONTENT"), Some("print('hi')"));
    }

    #[test]
    fn multiline_content_continues_until_next_key() {
        let text = "ACTION: CREATE_FILE\nPATH: a.py\nCONTENT: line one\nline two\n\nline four\n---END---";
        let out = parse_response(text);
        let content = out.actions[0].param("CONTENT").unwrap();
        assert!(content.contains("line one"));
        assert!(content.contains("line two"));
        assert!(content.contains("line four"));
    }

    #[test]
    fn multiple_blocks_execute_in_order() {
        let text = "ACTION: READ_FILE\nPATH: a\n---END---\nACTION: READ_FILE\nPATH: b\n---END---";
        let out = parse_response(text);
        assert_eq!(out.actions.len(), 2);
        assert_eq!(out.actions[0].seq_index, 0);
        assert_eq!(out.actions[1].seq_index, 1);
        assert_eq!(out.actions[0].param("PATH"), Some("a"));
        assert_eq!(out.actions[1].param("PATH"), Some("b"));
    }

    #[test]
    fn unterminated_block_is_rejected_but_later_blocks_still_run() {
        let text = "ACTION: READ_FILE\nPATH: a\nACTION: READ_FILE\nPATH: b\n---END---";
        let out = parse_response(text);
        assert_eq!(out.parse_errors.len(), 1);
        assert_eq!(out.actions.len(), 1);
        assert_eq!(out.actions[0].param("PATH"), Some("b"));
    }

    #[test]
    fn task_completed_as_action() {
        let text = "ACTION: TASK_COMPLETED\nMESSAGE: all done\n---END---";
        let out = parse_response(text);
        assert!(out.is_task_completed());
        assert_eq!(out.task_completed_message.as_deref(), Some("all done"));
    }

    #[test]
    fn task_completed_bare_sentinel_in_prose() {
        let text = "Some thoughts.\nTASK_COMPLETED: finished the refactor.";
        let out = parse_response(text);
        assert_eq!(
            out.task_completed_message.as_deref(),
            Some("finished the refactor.")
        );
    }

    #[test]
    fn text_outside_blocks_is_ignored() {
        let text = "Let me think about this.\nACTION: THINK\nCONTENT: pondering\n---END---\nOk done.";
        let out = parse_response(text);
        assert_eq!(out.actions.len(), 1);
    }

    #[test]
    fn round_trip_render_reparses_equivalently() {
        let text = "ACTION: EXECUTE\nCOMMAND: pytest\n---END---";
        let out = parse_response(text);
        let rendered = out.actions[0].render();
        let reparsed = parse_response(&rendered);
        assert_eq!(reparsed.actions.len(), 1);
        assert_eq!(reparsed.actions[0].tool, out.actions[0].tool);
        assert_eq!(reparsed.actions[0].params, out.actions[0].params);
    }
}
