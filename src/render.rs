//! Terminal rendering. Everything here is display-only: the transcript and
//! turn outcomes are never modified by what is written out.

use std::io::{self, Write};

use crate::session::{Role, Transcript, Turn, TurnError, TurnOutcome};

const BULLET: &str = "•";
const BULLET_REPLACEMENT: &str = "\n\n-";
const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

/// Turn inline bullets into paragraph-separated dash items.
pub fn display_text(content: &str) -> String {
    content.replace(BULLET, BULLET_REPLACEMENT)
}

fn speaker(role: Role) -> &'static str {
    match role {
        Role::User => "You",
        Role::Assistant => "Assistant",
    }
}

pub fn write_turn<W: Write>(out: &mut W, turn: &Turn) -> io::Result<()> {
    writeln!(out, "{}: {}", speaker(turn.role), display_text(&turn.content))?;
    writeln!(out)
}

/// Re-render the whole transcript, oldest first.
pub fn write_transcript<W: Write>(out: &mut W, transcript: &Transcript) -> io::Result<()> {
    for turn in transcript.turns() {
        write_turn(out, turn)?;
    }
    Ok(())
}

pub fn clear_screen<W: Write>(out: &mut W) -> io::Result<()> {
    write!(out, "{}", CLEAR_SCREEN)
}

/// Numbered history listing for `/history`.
pub fn write_history<W: Write>(out: &mut W, transcript: &Transcript) -> io::Result<()> {
    if transcript.is_empty() {
        return writeln!(out, "No conversation history.\n");
    }
    writeln!(out, "\nConversation History:")?;
    for (idx, turn) in transcript.turns().iter().enumerate() {
        writeln!(
            out,
            "{}. [{}] {}: {}",
            idx + 1,
            turn.at.format("%H:%M:%S"),
            turn.role.as_str(),
            turn.content
        )?;
    }
    writeln!(out)
}

fn write_diagnostic<W: Write>(out: &mut W, error: &TurnError) -> io::Result<()> {
    writeln!(out, "✗ {}", error)
}

/// Write what one turn produced, in the order it happened: agent problems,
/// the assistant's reply, the generated SQL, then its execution result.
pub fn write_outcome<W: Write>(out: &mut W, outcome: &TurnOutcome) -> io::Result<()> {
    for error in outcome
        .diagnostics
        .iter()
        .filter(|e| !matches!(e, TurnError::Warehouse(_)))
    {
        write_diagnostic(out, error)?;
    }

    if !outcome.text().is_empty() {
        writeln!(out, "{}: {}", speaker(Role::Assistant), display_text(outcome.text()))?;
        writeln!(out)?;
    }

    if !outcome.sql().is_empty() {
        writeln!(out, "### Generated SQL")?;
        writeln!(out, "```sql\n{}\n```", outcome.sql())?;

        for error in outcome
            .diagnostics
            .iter()
            .filter(|e| matches!(e, TurnError::Warehouse(_)))
        {
            write_diagnostic(out, error)?;
        }

        if let Some(table) = &outcome.table {
            writeln!(out, "\n### Query Results")?;
            writeln!(out, "{}", table)?;
        }
        writeln!(out)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregatedResponse;
    use crate::engine::{Column, QueryResult, WarehouseError};

    fn render(outcome: &TurnOutcome) -> String {
        let mut buf = Vec::new();
        write_outcome(&mut buf, outcome).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn bullets_become_dash_paragraphs() {
        assert_eq!(display_text("Farms:• North• South"), "Farms:\n\n- North\n\n- South");
        assert_eq!(display_text("no bullets"), "no bullets");
    }

    #[test]
    fn transcript_renders_oldest_first_with_bullets() {
        let mut transcript = Transcript::default();
        transcript.push(Role::User, "list farms");
        transcript.push(Role::Assistant, "•A•B");

        let mut buf = Vec::new();
        write_transcript(&mut buf, &transcript).unwrap();
        let rendered = String::from_utf8(buf).unwrap();

        assert_eq!(rendered, "You: list farms\n\nAssistant: \n\n-A\n\n-B\n\n");
    }

    #[test]
    fn warehouse_error_shows_sql_and_diagnostic_without_table() {
        let outcome = TurnOutcome {
            response: AggregatedResponse {
                text: "Here is the report".into(),
                sql: "SELECT * FROM nope".into(),
            },
            table: None,
            diagnostics: vec![TurnError::Warehouse(WarehouseError::Query(
                "Object 'NOPE' does not exist".into(),
            ))],
        };

        let rendered = render(&outcome);

        let text_at = rendered.find("Assistant: Here is the report").unwrap();
        let sql_at = rendered.find("### Generated SQL").unwrap();
        let err_at = rendered.find("✗ Error executing SQL: Object 'NOPE'").unwrap();
        assert!(text_at < sql_at && sql_at < err_at);
        assert!(rendered.contains("SELECT * FROM nope"));
        assert!(!rendered.contains("### Query Results"));
    }

    #[test]
    fn table_follows_sql() {
        let outcome = TurnOutcome {
            response: AggregatedResponse {
                text: String::new(),
                sql: "SELECT 1 AS N".into(),
            },
            table: Some(QueryResult {
                columns: vec![Column { name: "N".into(), data_type: "FIXED".into() }],
                rows: vec![vec![Some("1".into())]],
            }),
            diagnostics: vec![],
        };

        let rendered = render(&outcome);
        assert!(!rendered.contains("Assistant:"));
        let sql_at = rendered.find("### Generated SQL").unwrap();
        let table_at = rendered.find("### Query Results").unwrap();
        assert!(sql_at < table_at);
        assert!(rendered.contains("(1 row)"));
    }

    #[test]
    fn empty_outcome_renders_only_diagnostics() {
        let outcome = TurnOutcome {
            diagnostics: vec![TurnError::Agent(crate::agents::AgentError::Transport(
                "dns error".into(),
            ))],
            ..Default::default()
        };
        assert_eq!(render(&outcome), "✗ Error making request: dns error\n");
    }

    #[test]
    fn history_lists_numbered_turns() {
        let mut transcript = Transcript::default();
        let mut buf = Vec::new();
        write_history(&mut buf, &transcript).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "No conversation history.\n\n");

        transcript.push(Role::User, "hello");
        let mut buf = Vec::new();
        write_history(&mut buf, &transcript).unwrap();
        let rendered = String::from_utf8(buf).unwrap();
        assert!(rendered.contains("1. ["));
        assert!(rendered.contains("] user: hello"));
    }
}
