use crate::config::Config;
use crate::error::Result;
use crate::storage::{MessageLog, MessageRecord, SqliteMessageLog};
use colored::Colorize;
use prettytable::{format, Table};

const PREVIEW_CHARS: usize = 40;

/// Print the most recent persisted messages for `user_id`
///
/// # Errors
///
/// Returns an error if the message log cannot be opened or read.
pub async fn show_history(config: &Config, user_id: &str, limit: usize, json: bool) -> Result<()> {
    let log = SqliteMessageLog::open(config.storage.db_path.as_deref())?;
    let records = log.list_for_user(user_id, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!(
            "{}",
            format!("No messages found for user {}.", user_id).yellow()
        );
        return Ok(());
    }

    println!("\nMessages for user {}:", user_id.cyan());
    render_table(&records).printstd();
    println!();

    Ok(())
}

fn render_table(records: &[MessageRecord]) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    table.add_row(prettytable::row![
        "q_id".bold(),
        "Message".bold(),
        "Response".bold(),
        "Created".bold()
    ]);

    for record in records {
        let response = match &record.ai_response {
            Some(text) => preview(text, PREVIEW_CHARS).normal(),
            None => "(pending)".dimmed(),
        };
        table.add_row(prettytable::row![
            record.id.to_string().cyan(),
            preview(&record.message, PREVIEW_CHARS),
            response,
            record.created_at.format("%Y-%m-%d %H:%M").to_string()
        ]);
    }

    table
}

/// Shorten `text` to at most `max` characters, marking the cut
fn preview(text: &str, max: usize) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= max {
        return single_line;
    }
    let head: String = single_line.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_preview_keeps_short_text() {
        assert_eq!(preview("hello", 40), "hello");
    }

    #[test]
    fn test_preview_truncates_on_char_boundaries() {
        let text = "é".repeat(50);
        let shortened = preview(&text, 10);
        assert_eq!(shortened.chars().count(), 10);
        assert!(shortened.ends_with("..."));
    }

    #[test]
    fn test_preview_flattens_newlines() {
        assert_eq!(preview("a\nb", 40), "a b");
    }

    #[test]
    fn test_render_table_has_header_and_rows() {
        let records = vec![
            MessageRecord {
                id: 2,
                user_id: "42".to_string(),
                message: "second".to_string(),
                ai_response: None,
                created_at: Utc::now(),
            },
            MessageRecord {
                id: 1,
                user_id: "42".to_string(),
                message: "first".to_string(),
                ai_response: Some("{\"answer\":\"hi\"}".to_string()),
                created_at: Utc::now(),
            },
        ];

        let table = render_table(&records);
        assert_eq!(table.len(), 3);
    }
}
