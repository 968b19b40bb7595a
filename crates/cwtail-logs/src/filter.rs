use regex::Regex;

use cwtail_types::{LogEvent, Verdict};

/// Token lists as configured by the user
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterRules {
    /// Tokens sent to CloudWatch as a filter pattern, also highlighted
    pub include: Vec<String>,

    /// Tokens that mark an event as highlighted
    pub highlight: Vec<String>,

    /// Events whose message contains any of these are dropped
    pub exclude: Vec<String>,

    /// Events whose stream name contains any of these are dropped
    pub exclude_streams: Vec<String>,
}

/// Which token list produced a match
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchKind {
    Include,
    Highlight,
}

/// A matched span in a message, in byte offsets
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenMatch {
    pub start: usize,
    pub end: usize,
    pub kind: MatchKind,
}

/// Compiled include/highlight/exclude rules
#[derive(Clone)]
pub struct FilterEngine {
    include_tokens: Vec<String>,
    exclude: Vec<String>,
    exclude_streams: Vec<String>,

    /// One case-insensitive, word-bounded pattern per include token
    include: Vec<Regex>,

    /// One case-insensitive, word-bounded pattern per highlight token
    highlight: Vec<Regex>,
}

impl FilterEngine {
    pub fn new(rules: &FilterRules) -> Result<Self, regex::Error> {
        // CloudWatch's "any term" marker is added back by `filter_pattern`
        let include_tokens: Vec<String> = rules
            .include
            .iter()
            .map(|t| t.trim_start_matches('?').to_string())
            .filter(|t| !t.is_empty())
            .collect();

        Ok(Self {
            include: token_regexes(&include_tokens)?,
            highlight: token_regexes(&rules.highlight)?,
            include_tokens,
            exclude: non_empty(&rules.exclude),
            exclude_streams: non_empty(&rules.exclude_streams),
        })
    }

    /// Engine that passes everything unmarked
    pub fn pass_all() -> Self {
        Self {
            include_tokens: Vec::new(),
            exclude: Vec::new(),
            exclude_streams: Vec::new(),
            include: Vec::new(),
            highlight: Vec::new(),
        }
    }

    /// Decide what happens to an event; exclusion wins over highlighting
    pub fn evaluate(&self, event: &LogEvent) -> Verdict {
        if self.excludes_stream(&event.stream_id)
            || self.exclude.iter().any(|t| event.message.contains(t.as_str()))
        {
            return Verdict::Exclude;
        }

        let highlighted = self
            .highlight
            .iter()
            .chain(&self.include)
            .any(|re| re.is_match(&event.message));

        if highlighted {
            Verdict::Highlight
        } else {
            Verdict::Pass
        }
    }

    pub fn excludes_stream(&self, stream_id: &str) -> bool {
        self.exclude_streams
            .iter()
            .any(|t| stream_id.contains(t.as_str()))
    }

    /// CloudWatch filter pattern matching any include token (`?a ?b`)
    pub fn filter_pattern(&self) -> Option<String> {
        if self.include_tokens.is_empty() {
            return None;
        }
        let terms: Vec<String> = self
            .include_tokens
            .iter()
            .map(|t| {
                if t.chars().all(|c| c.is_alphanumeric() || c == '_') {
                    format!("?{}", t)
                } else {
                    format!("?\"{}\"", t.replace('"', "\\\""))
                }
            })
            .collect();
        Some(terms.join(" "))
    }

    /// Find non-overlapping token matches in a message (for colouring)
    pub fn find_matches(&self, text: &str) -> Vec<TokenMatch> {
        let mut matches: Vec<TokenMatch> = Vec::new();
        let sources = [
            (&self.include, MatchKind::Include),
            (&self.highlight, MatchKind::Highlight),
        ];
        for (regexes, kind) in sources {
            for re in regexes {
                matches.extend(
                    re.find_iter(text)
                        .filter(|m| !m.is_empty())
                        .map(|m| TokenMatch {
                            start: m.start(),
                            end: m.end(),
                            kind,
                        }),
                );
            }
        }

        matches.sort_by_key(|m| (m.start, std::cmp::Reverse(m.end)));
        let mut result: Vec<TokenMatch> = Vec::with_capacity(matches.len());
        for m in matches {
            if result.last().is_none_or(|prev| m.start >= prev.end) {
                result.push(m);
            }
        }
        result
    }

    /// Check if the engine passes everything unmarked
    pub fn is_empty(&self) -> bool {
        self.exclude.is_empty()
            && self.exclude_streams.is_empty()
            && self.include.is_empty()
            && self.highlight.is_empty()
    }
}

impl std::fmt::Debug for FilterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterEngine")
            .field("include", &self.include_tokens)
            .field(
                "highlight",
                &self.highlight.iter().map(Regex::as_str).collect::<Vec<_>>(),
            )
            .field("exclude", &self.exclude)
            .field("exclude_streams", &self.exclude_streams)
            .finish()
    }
}

fn non_empty(tokens: &[String]) -> Vec<String> {
    tokens.iter().filter(|t| !t.is_empty()).cloned().collect()
}

/// Compile a token as a whole-word, case-insensitive regex.
///
/// Tokens that are not valid regexes match literally instead.
fn token_regex(token: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(r"(?i)\b(?:{})\b", token))
        .or_else(|_| Regex::new(&format!(r"(?i)\b{}\b", regex::escape(token))))
}

fn token_regexes(tokens: &[String]) -> Result<Vec<Regex>, regex::Error> {
    tokens
        .iter()
        .filter(|t| !t.is_empty())
        .map(|t| token_regex(t))
        .collect()
}
