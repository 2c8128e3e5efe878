//! Output formatting for CLI

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use uibench_common::{AgentMeta, AgentMetrics};
use uibench_engine::compare::RankEntry;

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// Plain text format
    Plain,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    if items.is_empty() {
        println!("No items found.");
        return;
    }

    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);

            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }

            println!("{table}");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items).unwrap_or_default());
        }
        OutputFormat::Plain => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    println!("---");
                }
                let row = item.row();
                for (header, value) in T::headers().iter().zip(row.iter()) {
                    println!("{}: {}", header, value);
                }
            }
        }
    }
}

pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

pub fn print_warning(message: &str) {
    println!("⚠️  {}", message);
}

pub fn print_info(message: &str) {
    println!("ℹ️  {}", message);
}

fn percent(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

impl TableDisplay for AgentMeta {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "Version", "Defect Types", "Timeout", "Description"]
    }

    fn row(&self) -> Vec<String> {
        let types: Vec<String> = self
            .supported_defect_types
            .iter()
            .map(|t| format!("{:?}", t).to_lowercase())
            .collect();
        vec![
            self.name.clone(),
            self.version.clone(),
            if types.is_empty() {
                "-".to_string()
            } else {
                types.join(", ")
            },
            self.timeout_ms
                .map(|ms| format!("{}ms", ms))
                .unwrap_or_else(|| "default".to_string()),
            self.description.clone().unwrap_or_default(),
        ]
    }
}

impl TableDisplay for AgentMetrics {
    fn headers() -> Vec<&'static str> {
        vec![
            "Agent", "Total", "TP", "FP", "FN", "TN", "ERROR", "Precision", "Recall", "F1",
            "Accuracy", "Errors",
        ]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.agent_name.clone(),
            self.total.to_string(),
            self.counts.tp.to_string(),
            self.counts.fp.to_string(),
            self.counts.fn_.to_string(),
            self.counts.tn.to_string(),
            self.counts.error.to_string(),
            percent(self.precision),
            percent(self.recall),
            format!("{:.4}", self.f1),
            percent(self.accuracy),
            percent(self.error_rate),
        ]
    }
}

impl TableDisplay for RankEntry {
    fn headers() -> Vec<&'static str> {
        vec!["Rank", "Agent", "F1"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            format!("#{}", self.rank),
            self.agent_name.clone(),
            format!("{:.4}", self.f1),
        ]
    }
}
