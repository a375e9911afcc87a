//! Metadata badges shown under an answered turn.
//!
//! Decides which badges an answer gets; drawing them is up to the front end.
//! Empty lists never produce a badge.

use crate::models::{Confidence, OriginMode, Rating, TurnMeta};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Badge {
    Confidence(Confidence),
    /// `Local` or `Enriched`, with the number of web citations and their domains.
    Origin {
        mode: OriginMode,
        web: u32,
        domains: Vec<String>,
    },
    MissingInfo(Vec<String>),
    SuggestedEnrichment(Vec<String>),
    /// Distinct cited filenames.
    Sources(Vec<String>),
    /// Thumbs up/down; `rated` is set once feedback has been sent.
    Feedback { rated: Option<Rating> },
}

impl Badge {
    /// Short label, e.g. `confidence: high` or `Missing info (2)`.
    pub fn label(&self) -> String {
        match self {
            Badge::Confidence(level) => format!("confidence: {}", level.as_str()),
            Badge::Origin { mode, web, .. } => match mode {
                OriginMode::Enriched if *web > 0 => format!("Enriched ({})", web),
                OriginMode::Enriched => "Enriched".to_string(),
                OriginMode::Local => "Local".to_string(),
            },
            Badge::MissingInfo(items) => format!("Missing info ({})", items.len()),
            Badge::SuggestedEnrichment(items) => {
                format!("Suggested enrichment ({})", items.len())
            }
            Badge::Sources(files) => format!("Sources ({})", files.len()),
            Badge::Feedback { rated: None } => "Rate this answer".to_string(),
            Badge::Feedback {
                rated: Some(Rating::Up),
            } => "Rated 👍".to_string(),
            Badge::Feedback {
                rated: Some(Rating::Down),
            } => "Rated 👎".to_string(),
        }
    }

    /// Tooltip lines.
    pub fn details(&self) -> Vec<String> {
        match self {
            Badge::Origin {
                mode: OriginMode::Enriched,
                domains,
                ..
            } => domains.clone(),
            Badge::Origin { .. } => vec!["Answer uses only your uploaded documents.".to_string()],
            Badge::MissingInfo(items) | Badge::SuggestedEnrichment(items) | Badge::Sources(items) => {
                items.clone()
            }
            _ => Vec::new(),
        }
    }
}

fn non_empty(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Badges for an answer, in display order.
pub fn badges(meta: &TurnMeta) -> Vec<Badge> {
    let mut out = vec![
        Badge::Confidence(meta.confidence),
        Badge::Origin {
            mode: meta.origin.mode,
            web: meta.origin.web,
            domains: meta.origin.web_domains.iter().cloned().collect(),
        },
    ];

    let missing = non_empty(&meta.missing_info);
    if !missing.is_empty() {
        out.push(Badge::MissingInfo(missing));
    }
    let suggested = non_empty(&meta.suggested_enrichment);
    if !suggested.is_empty() {
        out.push(Badge::SuggestedEnrichment(suggested));
    }
    let sources: Vec<String> = meta.sources().into_iter().map(str::to_string).collect();
    if !sources.is_empty() {
        out.push(Badge::Sources(sources));
    }
    if meta.query_id.is_some() {
        out.push(Badge::Feedback {
            rated: meta.feedback,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AskResponse, Citation, Origin};

    #[test]
    fn local_answer_without_gaps_has_no_missing_info_badge() {
        let meta = TurnMeta::from_response(&AskResponse {
            answer: Some("Fourteen days.".into()),
            missing_info: vec![],
            ..Default::default()
        });
        let badges = badges(&meta);
        assert_eq!(badges.len(), 2);
        assert_eq!(badges[0].label(), "confidence: medium");
        assert_eq!(badges[1].label(), "Local");
        assert!(!badges.iter().any(|b| matches!(b, Badge::MissingInfo(_))));
    }

    #[test]
    fn blank_missing_info_items_are_dropped() {
        let meta = TurnMeta {
            missing_info: vec!["".into(), "  ".into()],
            ..Default::default()
        };
        assert!(!badges(&meta).iter().any(|b| matches!(b, Badge::MissingInfo(_))));
    }

    #[test]
    fn enriched_answer_lists_domains_and_sources() {
        let meta = TurnMeta {
            origin: Origin {
                mode: OriginMode::Enriched,
                web: 2,
                local: 1,
                web_domains: ["example.com".to_string(), "docs.rs".to_string()]
                    .into_iter()
                    .collect(),
            },
            missing_info: vec!["shipping costs".into()],
            citations: vec![
                Citation {
                    filename: "terms.pdf".into(),
                    ..Default::default()
                },
                Citation {
                    filename: "terms.pdf".into(),
                    ..Default::default()
                },
            ],
            query_id: Some("q".into()),
            ..Default::default()
        };
        let badges = badges(&meta);
        let labels: Vec<String> = badges.iter().map(Badge::label).collect();
        assert_eq!(
            labels,
            vec![
                "confidence: medium",
                "Enriched (2)",
                "Missing info (1)",
                "Sources (1)",
                "Rate this answer"
            ]
        );
        assert_eq!(badges[1].details(), vec!["docs.rs", "example.com"]);
    }
}
