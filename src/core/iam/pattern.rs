//! Pattern matching for IAM actions, resources and principal names
//!
//! Supports a single wildcard:
//! - `*` - Matches any run of characters, including the empty run and
//!   across `:` / `/` boundaries (e.g., `s3:Get*`, `*lambda*`)
//!
//! Runs of `*` (e.g. `s3:**`) collapse to one `*`, so equivalent patterns
//! compile to identical matchers. A pattern is compiled once into literal
//! segments and matched without re-parsing.

use crate::error::{CatroleError, Result};

/// How letters are compared while matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaseMode {
    /// IAM action names and resource patterns
    Sensitive,
    /// Display names and aliases
    Insensitive,
}

/// Compiled wildcard pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatternMatcher {
    source: String,
    segments: Vec<String>,
    case: CaseMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Star,
    Char(char),
}

impl PatternMatcher {
    /// Compile a search pattern
    ///
    /// Search patterns are matched case-insensitively since they are aimed at
    /// display names (`*lambda*` finds `AWSLambdaExecute`). Use
    /// [`PatternMatcher::compile_action`] where IAM's case-sensitive action
    /// and resource semantics apply.
    ///
    /// # Examples
    /// ```
    /// use catrole::PatternMatcher;
    ///
    /// let s3 = PatternMatcher::compile("s3:*").unwrap();
    /// assert!(s3.matches("s3:CreateBucket"));
    /// assert!(!s3.matches("ec2:RunInstances"));
    ///
    /// assert!(PatternMatcher::compile("*lambda*").unwrap().matches("AWSLambdaExecute"));
    /// assert!(PatternMatcher::compile("").is_err());
    /// ```
    pub fn compile(pattern: &str) -> Result<Self> {
        Self::compile_with(pattern, CaseMode::Insensitive)
    }

    /// Compile a case-sensitive pattern (IAM actions and resources)
    ///
    /// # Examples
    /// ```
    /// use catrole::PatternMatcher;
    ///
    /// let get = PatternMatcher::compile_action("s3:Get*").unwrap();
    /// assert!(get.matches("s3:GetObject"));
    /// assert!(!get.matches("s3:getobject"));
    /// ```
    pub fn compile_action(pattern: &str) -> Result<Self> {
        Self::compile_with(pattern, CaseMode::Sensitive)
    }

    /// Compile a pattern with an explicit case mode
    pub fn compile_with(pattern: &str, case: CaseMode) -> Result<Self> {
        if pattern.is_empty() {
            return Err(CatroleError::InvalidPattern(
                "pattern cannot be empty".to_string(),
            ));
        }

        let source = normalize_wildcards(pattern);
        let folded = match case {
            CaseMode::Sensitive => source.clone(),
            CaseMode::Insensitive => source.to_lowercase(),
        };
        let segments = folded.split('*').map(str::to_string).collect();

        Ok(PatternMatcher {
            source,
            segments,
            case,
        })
    }

    /// The normalized pattern text
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn case_mode(&self) -> CaseMode {
        self.case
    }

    /// Whether the pattern contains a wildcard
    pub fn is_literal(&self) -> bool {
        self.segments.len() == 1
    }

    /// Check if a candidate string matches the pattern
    pub fn matches(&self, candidate: &str) -> bool {
        match self.case {
            CaseMode::Sensitive => self.matches_folded(candidate),
            CaseMode::Insensitive => self.matches_folded(&candidate.to_lowercase()),
        }
    }

    fn matches_folded(&self, candidate: &str) -> bool {
        // Literal pattern - exact match
        if self.is_literal() {
            return self.segments[0] == candidate;
        }

        let first = &self.segments[0];
        let last = &self.segments[self.segments.len() - 1];

        // First segment anchors the start, last segment anchors the end
        if candidate.len() < first.len() + last.len()
            || !candidate.starts_with(first.as_str())
            || !candidate.ends_with(last.as_str())
        {
            return false;
        }

        let end = candidate.len() - last.len();
        let mut pos = first.len();

        // Middle segments must appear in order between the anchors
        for middle in &self.segments[1..self.segments.len() - 1] {
            if middle.is_empty() {
                continue;
            }
            match candidate[pos..end].find(middle.as_str()) {
                Some(found) => pos += found + middle.len(),
                None => return false,
            }
        }

        true
    }

    /// Check whether every string matched by `other` is also matched by `self`
    ///
    /// Compares the two patterns directly instead of enumerating the strings
    /// they match: a `*` in `self` may absorb anything in `other`, including
    /// its wildcards, while a literal character in `self` only absorbs the same
    /// literal character.
    ///
    /// # Examples
    /// ```
    /// use catrole::PatternMatcher;
    ///
    /// let get = PatternMatcher::compile("s3:Get*").unwrap();
    /// assert!(get.covers(&PatternMatcher::compile("s3:GetObject").unwrap()));
    /// assert!(get.covers(&PatternMatcher::compile("s3:GetObject*").unwrap()));
    /// assert!(!get.covers(&PatternMatcher::compile("s3:*").unwrap()));
    /// ```
    pub fn covers(&self, other: &PatternMatcher) -> bool {
        let insensitive = self.case == CaseMode::Insensitive || other.case == CaseMode::Insensitive;
        let outer = tokenize(&self.source, insensitive);
        let inner = tokenize(&other.source, insensitive);

        // table[i][j]: outer[i..] covers inner[j..]
        let (n, m) = (outer.len(), inner.len());
        let mut table = vec![vec![false; m + 1]; n + 1];
        table[n][m] = true;

        for i in (0..n).rev() {
            for j in (0..=m).rev() {
                table[i][j] = match outer[i] {
                    Token::Star => table[i + 1][j] || (j < m && table[i][j + 1]),
                    Token::Char(c) => j < m && inner[j] == Token::Char(c) && table[i + 1][j + 1],
                };
            }
        }

        table[0][0]
    }
}

impl std::fmt::Display for PatternMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

/// Collapse consecutive `*` into a single wildcard
pub fn normalize_wildcards(pattern: &str) -> String {
    let mut normalized = String::with_capacity(pattern.len());
    let mut previous_star = false;
    for c in pattern.chars() {
        if c == '*' {
            if previous_star {
                continue;
            }
            previous_star = true;
        } else {
            previous_star = false;
        }
        normalized.push(c);
    }
    normalized
}

fn tokenize(pattern: &str, fold: bool) -> Vec<Token> {
    pattern
        .chars()
        .flat_map(|c| {
            let chars: Vec<char> = if fold {
                c.to_lowercase().collect()
            } else {
                vec![c]
            };
            chars.into_iter()
        })
        .map(|c| if c == '*' { Token::Star } else { Token::Char(c) })
        .collect()
}
