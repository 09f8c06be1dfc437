//! Filename patterns that map grid positions to image names
//!
//! Templates carry placeholders in braces whose letter selects the value and
//! whose length gives the zero-padded width: `{rr}` is the row, `{ccc}` the
//! column and `{pppp}` the sequential position number.

use crate::io::error::{Result, invalid_parameter};
use crate::spatial::grid::GridPosition;
use crate::spatial::traversal::Traversal;

/// How tiles are named on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilenamePattern {
    /// Names built from row and column indices, e.g. `tile_r{rr}_c{cc}.tif`
    RowColumn {
        /// Template containing `{r..}` and `{c..}` placeholders
        template: String,
        /// Index of the first row and column
        start: usize,
    },
    /// Names built from one running number, e.g. `tile_{ppp}.png`
    Sequential {
        /// Template containing a `{p..}` placeholder
        template: String,
        /// Acquisition order that assigns the running number
        numbering: Traversal,
        /// Number of the first tile
        start: usize,
    },
}

impl FilenamePattern {
    /// Row/column pattern with zero-based indices
    pub fn row_column(template: impl Into<String>) -> Self {
        Self::RowColumn {
            template: template.into(),
            start: 0,
        }
    }

    /// Sequential pattern numbered in `numbering` order from `start`
    pub fn sequential(template: impl Into<String>, numbering: Traversal, start: usize) -> Self {
        Self::Sequential {
            template: template.into(),
            numbering,
            start,
        }
    }

    /// The raw template text
    pub fn template(&self) -> &str {
        match self {
            Self::RowColumn { template, .. } | Self::Sequential { template, .. } => template,
        }
    }

    /// Check that the template carries the placeholders this pattern needs
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for malformed or missing placeholders
    pub fn validate(&self) -> Result<()> {
        let letters = placeholders(self.template())?;
        let required: &[char] = match self {
            Self::RowColumn { .. } => &['r', 'c'],
            Self::Sequential { .. } => &['p'],
        };

        for letter in required {
            if !letters.contains(letter) {
                return Err(invalid_parameter(
                    "pattern",
                    &self.template(),
                    &format!("missing a {{{letter}}} placeholder"),
                ));
            }
        }
        Ok(())
    }

    /// Name of the tile at `position` in a `rows x cols` grid
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the template is malformed or the
    /// position lies outside the grid
    pub fn name_for(&self, position: GridPosition, rows: usize, cols: usize) -> Result<String> {
        match self {
            Self::RowColumn { template, start } => substitute(template, |letter| match letter {
                'r' => Some(position.row + start),
                'c' => Some(position.col + start),
                _ => None,
            }),
            Self::Sequential {
                template,
                numbering,
                start,
            } => {
                let rank = numbering.rank_of(position, rows, cols).ok_or_else(|| {
                    invalid_parameter("position", &position, &"outside the tile grid")
                })?;
                substitute(template, |letter| (letter == 'p').then_some(rank + start))
            }
        }
    }
}

/// Distinct placeholder letters appearing in a template
fn placeholders(template: &str) -> Result<Vec<char>> {
    let mut letters = Vec::new();
    for token in tokens(template)? {
        if let Token::Placeholder { letter, .. } = token {
            if !letters.contains(&letter) {
                letters.push(letter);
            }
        }
    }
    Ok(letters)
}

/// Replace every placeholder with its zero-padded value
fn substitute<F>(template: &str, value_for: F) -> Result<String>
where
    F: Fn(char) -> Option<usize>,
{
    let mut name = String::with_capacity(template.len() + 8);
    for token in tokens(template)? {
        match token {
            Token::Literal(text) => name.push_str(text),
            Token::Placeholder { letter, width } => {
                let value = value_for(letter).ok_or_else(|| {
                    invalid_parameter(
                        "pattern",
                        &template,
                        &format!("placeholder {{{letter}}} is not valid here"),
                    )
                })?;
                name.push_str(&format!("{value:0width$}"));
            }
        }
    }
    Ok(name)
}

enum Token<'a> {
    Literal(&'a str),
    Placeholder { letter: char, width: usize },
}

fn tokens(template: &str) -> Result<Vec<Token<'_>>> {
    let mut tokens = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let (literal, tail) = rest.split_at(open);
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        let close = tail
            .find('}')
            .ok_or_else(|| invalid_parameter("pattern", &template, &"unclosed placeholder"))?;
        let body = tail.get(1..close).unwrap_or_default();
        let mut letters = body.chars();
        let letter = letters
            .next()
            .ok_or_else(|| invalid_parameter("pattern", &template, &"empty placeholder"))?;

        if !matches!(letter, 'r' | 'c' | 'p') || letters.any(|other| other != letter) {
            return Err(invalid_parameter(
                "pattern",
                &template,
                &format!("unknown placeholder {{{body}}}"),
            ));
        }

        tokens.push(Token::Placeholder {
            letter,
            width: body.chars().count(),
        });
        rest = tail.get(close + 1..).unwrap_or_default();
    }

    if !rest.is_empty() {
        tokens.push(Token::Literal(rest));
    }
    Ok(tokens)
}
