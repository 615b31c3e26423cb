//! Output formatters for feed items.

use clap::ValueEnum;
use p2patter_client::FeedItem;
use p2patter_proto::model::render_unavailable;
use p2patter_proto::Message;

/// Output format for followed messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Rendered text, as the service renders it
    Text,
    /// One JSON object per line
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format one message.
    fn format_message(&self, message: &Message) -> String;

    /// Format the report for an owner whose service went away.
    fn format_unavailable(&self, owner: &str) -> String;

    /// Format a feed item as output lines. The initial snapshot yields one
    /// entry per message.
    fn format_item(&self, item: &FeedItem) -> Vec<String> {
        match item {
            FeedItem::Snapshot(messages) => messages
                .iter()
                .map(|message| self.format_message(message))
                .collect(),
            FeedItem::Message(message) => vec![self.format_message(message)],
            FeedItem::Unavailable(owner) => vec![self.format_unavailable(owner)],
        }
    }
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Separator, header, and text lines.
pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_message(&self, message: &Message) -> String {
        message.render()
    }

    fn format_unavailable(&self, owner: &str) -> String {
        render_unavailable(owner)
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_message(&self, message: &Message) -> String {
        serde_json::to_string(message).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_unavailable(&self, owner: &str) -> String {
        serde_json::json!({
            "owner": owner,
            "unavailable": true
        })
        .to_string()
    }
}
