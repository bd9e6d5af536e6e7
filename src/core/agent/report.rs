use std::fmt;

use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use serde::Serialize;

use super::scope::Scope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceStatus {
    Pass,
    Fail,
    NotSupported,
    Unknown,
}

impl ComplianceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ComplianceStatus::Pass => "PASS",
            ComplianceStatus::Fail => "FAIL",
            ComplianceStatus::NotSupported => "NOT SUPPORTED",
            ComplianceStatus::Unknown => "UNKNOWN",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        let normalized = raw
            .trim()
            .trim_matches(|c: char| c == '*' || c == '`' || c == '.')
            .to_ascii_uppercase()
            .replace('_', " ");

        if normalized.starts_with("PASS") {
            Some(ComplianceStatus::Pass)
        } else if normalized.starts_with("FAIL") {
            Some(ComplianceStatus::Fail)
        } else if normalized.starts_with("NOT SUPPORTED") || normalized.starts_with("UNSUPPORTED") {
            Some(ComplianceStatus::NotSupported)
        } else {
            None
        }
    }
}

impl fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComplianceReport {
    pub status: ComplianceStatus,
    pub summary: String,
    pub findings: Vec<String>,
    pub coverage: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Summary,
    Findings,
    Coverage,
    Other,
}

impl ComplianceReport {
    pub fn budget_exhausted(step_budget: u32, tool_calls: u32, scope: &Scope) -> Self {
        Self {
            status: ComplianceStatus::Fail,
            summary: format!(
                "The compliance check could not complete within the step budget of {step_budget} round-trips."
            ),
            findings: Vec::new(),
            coverage: format!(
                "Stopped after {tool_calls} tool call(s) against {scope}. Results are incomplete."
            ),
        }
    }

    pub fn malformed_turn(step: u32, tool_calls: u32, scope: &Scope) -> Self {
        Self {
            status: ComplianceStatus::Fail,
            summary: format!(
                "The compliance check could not complete: the model returned neither tool calls nor an answer at step {step}."
            ),
            findings: Vec::new(),
            coverage: format!(
                "Stopped after {tool_calls} tool call(s) against {scope}. Results are incomplete."
            ),
        }
    }

    pub fn to_markdown(&self) -> String {
        let findings = if self.findings.is_empty() {
            "None.".to_string()
        } else {
            self.findings
                .iter()
                .map(|finding| format!("- {finding}"))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            "## Status: {}\n\n## Summary\n{}\n\n## Findings\n{}\n\n## Coverage\n{}\n",
            self.status, self.summary, findings, self.coverage
        )
    }

    /// Best-effort read of a model answer laid out as `## Status: X`, `## Summary`,
    /// `## Findings`, `## Coverage`. Never rejects; returns `None` only when the
    /// text carries none of those parts.
    pub fn from_markdown(text: &str) -> Option<Self> {
        let mut status = None;
        let mut summary = Vec::new();
        let mut findings = Vec::new();
        let mut coverage = Vec::new();

        let mut section = Section::Preamble;
        let mut heading: Option<String> = None;
        let mut item: Option<String> = None;
        let mut item_depth = 0u32;
        let mut paragraph: Option<String> = None;

        for event in Parser::new(text) {
            match event {
                Event::Start(Tag::Heading { .. }) => heading = Some(String::new()),
                Event::End(TagEnd::Heading(_)) => {
                    if let Some(title) = heading.take() {
                        section = classify_heading(&title, &mut status);
                    }
                }
                Event::Start(Tag::Item) => {
                    if item_depth == 0 {
                        item = Some(String::new());
                    }
                    item_depth += 1;
                }
                Event::End(TagEnd::Item) => {
                    item_depth = item_depth.saturating_sub(1);
                    if item_depth == 0 {
                        if let Some(entry) = item.take().map(|s| s.trim().to_string()) {
                            if section == Section::Findings && !entry.is_empty() {
                                findings.push(entry);
                            }
                        }
                    }
                }
                Event::Start(Tag::Paragraph) if item_depth == 0 => paragraph = Some(String::new()),
                Event::End(TagEnd::Paragraph) => {
                    if let Some(para) = paragraph.take().map(|s| s.trim().to_string()) {
                        match section {
                            Section::Summary => summary.push(para),
                            Section::Coverage => coverage.push(para),
                            _ => {}
                        }
                    }
                }
                Event::Text(chunk) | Event::Code(chunk) => {
                    if let Some(buf) = heading
                        .as_mut()
                        .or(item.as_mut())
                        .or(paragraph.as_mut())
                    {
                        buf.push_str(&chunk);
                    }
                }
                Event::SoftBreak | Event::HardBreak => {
                    if let Some(buf) = heading
                        .as_mut()
                        .or(item.as_mut())
                        .or(paragraph.as_mut())
                    {
                        buf.push(' ');
                    }
                }
                _ => {}
            }
        }

        let status = status.or_else(|| status_from_text(text));
        if status.is_none() && summary.is_empty() && findings.is_empty() && coverage.is_empty() {
            return None;
        }

        Some(Self {
            status: status.unwrap_or(ComplianceStatus::Unknown),
            summary: summary.join("\n\n"),
            findings,
            coverage: coverage.join("\n\n"),
        })
    }
}

fn classify_heading(title: &str, status: &mut Option<ComplianceStatus>) -> Section {
    let title = title.trim();
    let lowered = title.to_ascii_lowercase();

    if lowered.starts_with("status") {
        if let Some((_, value)) = title.split_once(':') {
            if status.is_none() {
                *status = ComplianceStatus::parse(value);
            }
        }
        return Section::Other;
    }

    match lowered.as_str() {
        "summary" => Section::Summary,
        "findings" => Section::Findings,
        "coverage" => Section::Coverage,
        _ => Section::Other,
    }
}

// Answers that ignore the heading layout, e.g. `**Status**: PASS`.
fn status_from_text(text: &str) -> Option<ComplianceStatus> {
    text.lines().find_map(|line| {
        let cleaned = line.replace('*', "");
        let (_, value) = cleaned.split_once("Status:")?;
        ComplianceStatus::parse(value)
    })
}

/// What a run produced: the model's own answer, shown verbatim, or a report the
/// loop synthesised because the model never converged.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutput {
    Answer(String),
    Degraded(ComplianceReport),
}

impl CheckOutput {
    pub fn text(&self) -> String {
        match self {
            CheckOutput::Answer(text) => text.clone(),
            CheckOutput::Degraded(report) => report.to_markdown(),
        }
    }

    pub fn status(&self) -> ComplianceStatus {
        self.report()
            .map(|report| report.status)
            .unwrap_or(ComplianceStatus::Unknown)
    }

    pub fn report(&self) -> Option<ComplianceReport> {
        match self {
            CheckOutput::Answer(text) => ComplianceReport::from_markdown(text),
            CheckOutput::Degraded(report) => Some(report.clone()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, CheckOutput::Degraded(_))
    }
}
