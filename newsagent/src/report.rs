use chrono::{DateTime, Local};
use pulldown_cmark::{html, Event, Options, Parser};
use std::fmt::Write as _;

use crate::models::{Sentiment, SourceKind, SummarizedItem};

pub const REPORT_TITLE: &str = "Daily News Report";
const EMPTY_SECTION: &str = "_No matching items._";

const HTML_HEAD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Daily News Report</title>
<style>
body { font-family: system-ui, sans-serif; max-width: 860px; margin: 2rem auto; padding: 0 1rem; line-height: 1.55; color: #1f2933; }
h2 { border-bottom: 1px solid #d9e2ec; padding-bottom: .3rem; }
blockquote { margin: .5rem 0; padding: .5rem 1rem; background: #f5f7fa; border-left: 4px solid #829ab1; }
a { color: #0b69a3; }
</style>
</head>
<body>
"#;
const HTML_TAIL: &str = "</body>\n</html>\n";

/// Items grouped under one category heading
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub category: String,
    pub items: Vec<SummarizedItem>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SentimentCounts {
    pub total: usize,
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
}

/// One run's report, created by generate_output and handed to a sink.
#[derive(Debug, Clone)]
pub struct Report {
    pub generated_at: DateTime<Local>,
    pub keywords: Vec<String>,
    pub sections: Vec<Section>,
    /// Skipped sources and degraded items, one line each
    pub notes: Vec<String>,
    pub include_links: bool,
}

impl Report {
    /// Group `items` into sections. Every category of `category_order` gets a
    /// section (possibly empty); unknown categories follow in first-seen order.
    /// Items keep their input order within a section.
    pub fn build(
        items: Vec<SummarizedItem>,
        category_order: &[String],
        keywords: Vec<String>,
        notes: Vec<String>,
        include_links: bool,
    ) -> Self {
        let mut sections: Vec<Section> = Vec::new();
        for category in category_order {
            if !sections.iter().any(|s| &s.category == category) {
                sections.push(Section {
                    category: category.clone(),
                    items: Vec::new(),
                });
            }
        }

        for item in items {
            match sections.iter_mut().find(|s| s.category == item.item.category) {
                Some(section) => section.items.push(item),
                None => sections.push(Section {
                    category: item.item.category.clone(),
                    items: vec![item],
                }),
            }
        }

        Self {
            generated_at: Local::now(),
            keywords,
            sections,
            notes,
            include_links,
        }
    }

    pub fn items(&self) -> impl Iterator<Item = &SummarizedItem> {
        self.sections.iter().flat_map(|s| s.items.iter())
    }

    pub fn item_count(&self) -> usize {
        self.sections.iter().map(|s| s.items.len()).sum()
    }

    pub fn counts(&self) -> SentimentCounts {
        let mut counts = SentimentCounts::default();
        for item in self.items() {
            counts.total += 1;
            match item.sentiment {
                Sentiment::Positive => counts.positive += 1,
                Sentiment::Negative => counts.negative += 1,
                Sentiment::Neutral => counts.neutral += 1,
            }
        }
        counts
    }

    /// Item count per source kind, in first-seen order.
    pub fn source_counts(&self) -> Vec<(SourceKind, usize)> {
        let mut counts: Vec<(SourceKind, usize)> = Vec::new();
        for entry in self.items() {
            match counts.iter_mut().find(|(kind, _)| *kind == entry.item.source_kind) {
                Some((_, n)) => *n += 1,
                None => counts.push((entry.item.source_kind, 1)),
            }
        }
        counts
    }

    /// `news_report_<YYYY-MM-DD_HH-MM-SS>.md`
    pub fn filename(&self) -> String {
        format!("news_report_{}.md", self.generated_at.format("%Y-%m-%d_%H-%M-%S"))
    }

    /// Full markdown document: title, generation time, then the body.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# {}\n", REPORT_TITLE);
        let _ = writeln!(
            out,
            "**Generated:** {}\n",
            self.generated_at.format("%Y-%m-%d %H:%M:%S")
        );
        out.push_str(&self.render_body());
        out
    }

    /// The markdown document as a standalone HTML page. Raw HTML inside
    /// scraped titles or summaries is shown as text.
    pub fn render_html(&self) -> String {
        let markdown = self.render();
        let events = Parser::new_ext(&markdown, Options::ENABLE_STRIKETHROUGH).map(|event| match event {
            Event::Html(raw) => Event::Text(raw),
            other => other,
        });
        let mut out = String::from(HTML_HEAD);
        html::push_html(&mut out, events);
        out.push_str(HTML_TAIL);
        out
    }

    /// Everything below the generation line. Depends only on the report
    /// contents, never on the clock.
    pub fn render_body(&self) -> String {
        let mut out = String::new();

        let keywords = if self.keywords.is_empty() {
            "(none)".to_string()
        } else {
            self.keywords.join(", ")
        };
        let _ = writeln!(out, "**Keywords:** {}\n", keywords);

        let counts = self.counts();
        let _ = writeln!(out, "## Summary\n");
        let _ = writeln!(out, "- **Total items:** {}", counts.total);
        let _ = writeln!(out, "- **Positive:** {}", counts.positive);
        let _ = writeln!(out, "- **Negative:** {}", counts.negative);
        let _ = writeln!(out, "- **Neutral:** {}\n", counts.neutral);

        let sources = self.source_counts();
        if !sources.is_empty() {
            let _ = writeln!(out, "### Sources\n");
            for (kind, n) in sources {
                let _ = writeln!(out, "- **{}:** {} items", kind.label(), n);
            }
            out.push('\n');
        }

        for section in &self.sections {
            let _ = writeln!(out, "## {}\n", category_title(&section.category));
            if section.items.is_empty() {
                let _ = writeln!(out, "{}\n", EMPTY_SECTION);
                continue;
            }
            for item in &section.items {
                self.render_item(&mut out, item);
            }
        }

        if !self.notes.is_empty() {
            let _ = writeln!(out, "## Processing Notes\n");
            for note in &self.notes {
                let _ = writeln!(out, "- {}", note);
            }
            out.push('\n');
        }

        out
    }

    fn render_item(&self, out: &mut String, entry: &SummarizedItem) {
        let item = &entry.item;
        if self.include_links && !item.url.is_empty() {
            let _ = writeln!(out, "### [{}]({})\n", escape_link_text(&item.title), item.url);
        } else {
            let _ = writeln!(out, "### {}\n", item.title);
        }

        let published = item
            .published_at
            .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        let keywords = if item.keywords_matched.is_empty() {
            "-".to_string()
        } else {
            item.keywords_matched.join(", ")
        };
        let _ = writeln!(
            out,
            "**Source:** {} | **Sentiment:** {} | **Published:** {} | **Keywords:** {}\n",
            item.source_name,
            entry.sentiment.display(),
            published,
            keywords
        );

        for line in entry.summary.lines() {
            let _ = writeln!(out, "> {}", line);
        }
        let _ = writeln!(out, "\n---\n");
    }
}

fn escape_link_text(text: &str) -> String {
    text.replace('[', "\\[").replace(']', "\\]")
}

/// `tech_news` -> `Tech News`
pub fn category_title(category: &str) -> String {
    category
        .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
