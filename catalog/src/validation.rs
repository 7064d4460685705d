//! Book input validation
//!
//! Field lengths and ranges are declared with `validator`; the publication
//! date and genre labels need hand checks on top.

use chrono::NaiveDate;
use library_core::{Error, Genre, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::OnceLock;
use validator::Validate;

/// Maximum number of genres per book
pub const MAX_GENRES: usize = 3;

/// New copy as submitted by staff
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewBook {
    /// Unique copy code
    #[validate(length(min = 1, max = 10, message = "code must be 1-10 characters"))]
    pub code: String,

    /// Title
    #[validate(length(min = 1, max = 50, message = "title must be 1-50 characters"))]
    pub title: String,

    /// Subtitle
    #[validate(length(max = 50, message = "subtitle must be at most 50 characters"))]
    pub subtitle: Option<String>,

    /// Author
    #[validate(length(min = 1, max = 50, message = "author must be 1-50 characters"))]
    pub author: String,

    /// Publisher
    #[validate(length(min = 1, max = 50, message = "publisher must be 1-50 characters"))]
    pub publisher: String,

    /// Publication date, `YYYY-MM-DD`
    pub published_date: String,

    /// Description
    #[validate(length(min = 1, max = 1000, message = "description must be 1-1000 characters"))]
    pub description: String,

    /// Genre labels
    #[validate(length(min = 1, max = 3, message = "between 1 and 3 genres are required"))]
    pub genres: Vec<String>,

    /// ISBN-10
    #[validate(length(equal = 10, message = "isbn10 must be 10 characters"))]
    pub isbn10: String,

    /// ISBN-13
    #[validate(length(equal = 13, message = "isbn13 must be 13 characters"))]
    pub isbn13: String,

    /// Page count
    #[validate(range(min = 1, message = "page count must be positive"))]
    pub page_count: u32,
}

/// Fields of a [`NewBook`] after every check passed
#[derive(Debug, Clone)]
pub(crate) struct CheckedBook {
    pub input: NewBook,
    pub published_date: NaiveDate,
    pub genres: Vec<Genre>,
}

fn date_format() -> &'static Regex {
    static DATE: OnceLock<Regex> = OnceLock::new();
    DATE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid date regex"))
}

impl NewBook {
    /// Copy with surrounding whitespace removed from every text field
    pub fn trimmed(&self) -> Self {
        Self {
            code: self.code.trim().to_string(),
            title: self.title.trim().to_string(),
            subtitle: self
                .subtitle
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            author: self.author.trim().to_string(),
            publisher: self.publisher.trim().to_string(),
            published_date: self.published_date.trim().to_string(),
            description: self.description.trim().to_string(),
            genres: self.genres.iter().map(|g| g.trim().to_string()).collect(),
            isbn10: self.isbn10.trim().to_string(),
            isbn13: self.isbn13.trim().to_string(),
            page_count: self.page_count,
        }
    }

    /// Run every check; `today` bounds the publication date
    pub(crate) fn check(&self, today: NaiveDate) -> Result<CheckedBook> {
        let input = self.trimmed();
        input
            .validate()
            .map_err(|e| Error::Validation(e.to_string()))?;

        let published_date = parse_published_date(&input.published_date, today)?;
        let genres = parse_genres(&input.genres)?;

        Ok(CheckedBook {
            input,
            published_date,
            genres,
        })
    }
}

/// Parse a `YYYY-MM-DD` date that is not in the future
pub fn parse_published_date(raw: &str, today: NaiveDate) -> Result<NaiveDate> {
    if !date_format().is_match(raw) {
        return Err(Error::Validation(format!(
            "Published date {} must be formatted YYYY-MM-DD",
            raw
        )));
    }

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| Error::Validation(format!("Published date {} is not a real date", raw)))?;

    if date > today {
        return Err(Error::Validation(format!(
            "Published date {} is in the future",
            raw
        )));
    }
    Ok(date)
}

/// Parse genre labels, rejecting unknown and repeated ones
pub fn parse_genres(labels: &[String]) -> Result<Vec<Genre>> {
    if labels.is_empty() || labels.len() > MAX_GENRES {
        return Err(Error::Validation(format!(
            "Between 1 and {} genres are required",
            MAX_GENRES
        )));
    }

    let mut genres = Vec::with_capacity(labels.len());
    for label in labels {
        let genre = Genre::from_str(label)?;
        if genres.contains(&genre) {
            return Err(Error::Validation(format!("Genre {} listed twice", genre)));
        }
        genres.push(genre);
    }
    Ok(genres)
}
