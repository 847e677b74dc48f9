//! Conversation topics
//!
//! Loaded once at startup and only read afterwards. One topic is picked at
//! random for every pairing notice.

use std::fs;
use std::iter::Peekable;
use std::path::Path;

use rand::Rng;
use tracing::info;

use crate::error::StartupError;

/// Immutable, non-empty list of topics
#[derive(Debug, Clone)]
pub struct Topics(Vec<String>);

impl Topics {
    /// Build from an explicit list
    ///
    /// Returns `None` when no non-empty topic remains.
    pub fn new(topics: Vec<String>) -> Option<Self> {
        let topics: Vec<String> = topics
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if topics.is_empty() {
            None
        } else {
            Some(Self(topics))
        }
    }

    /// Load topics from a CSV file
    ///
    /// The first field of every record is a topic. Quoted fields may hold
    /// commas, doubled quotes and line breaks. A malformed record makes the
    /// whole file invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StartupError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| StartupError::Topics {
            path: path.to_path_buf(),
            source,
        })?;

        let records = first_fields(&contents).map_err(|e| StartupError::MalformedTopics {
            path: path.to_path_buf(),
            line: e.line,
            reason: e.reason,
        })?;
        let topics =
            Self::new(records).ok_or_else(|| StartupError::NoTopics(path.to_path_buf()))?;

        info!("Loaded {} topics from {}", topics.len(), path.display());
        Ok(topics)
    }

    /// Pick a topic uniformly at random
    pub fn random(&self) -> &str {
        let index = rand::thread_rng().gen_range(0..self.0.len());
        &self.0[index]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

/// Where and why a record could not be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
struct MalformedRecord {
    line: usize,
    reason: &'static str,
}

impl MalformedRecord {
    fn at(line: usize, reason: &'static str) -> Self {
        Self { line, reason }
    }
}

type Chars<'a> = Peekable<std::str::Chars<'a>>;

/// First field of every CSV record
///
/// Blank lines are skipped. Every record must have as many fields as the
/// first one.
fn first_fields(contents: &str) -> Result<Vec<String>, MalformedRecord> {
    let contents = contents.replace("\r\n", "\n");
    let mut chars = contents.chars().peekable();
    let mut line = 1;
    let mut expected_fields = None;
    let mut firsts = Vec::new();

    while let Some(&c) = chars.peek() {
        if c == '\n' {
            chars.next();
            line += 1;
            continue;
        }

        let record_line = line;
        let mut fields = Vec::new();
        loop {
            fields.push(read_field(&mut chars, &mut line)?);
            match chars.next() {
                Some(',') => continue,
                Some('\n') => line += 1,
                _ => {}
            }
            break;
        }

        match expected_fields {
            None => expected_fields = Some(fields.len()),
            Some(n) if n != fields.len() => {
                return Err(MalformedRecord::at(record_line, "wrong number of fields"));
            }
            Some(_) => {}
        }
        firsts.push(fields.swap_remove(0));
    }

    Ok(firsts)
}

/// Read one field, stopping before the comma or newline that ends it
fn read_field(chars: &mut Chars<'_>, line: &mut usize) -> Result<String, MalformedRecord> {
    let mut field = String::new();

    if chars.peek() != Some(&'"') {
        while let Some(&c) = chars.peek() {
            match c {
                ',' | '\n' => break,
                '"' => return Err(MalformedRecord::at(*line, "bare \" in non-quoted field")),
                _ => {
                    field.push(c);
                    chars.next();
                }
            }
        }
        return Ok(field);
    }

    let start = *line;
    chars.next();
    loop {
        match chars.next() {
            None => return Err(MalformedRecord::at(start, "unterminated quoted field")),
            Some('"') if chars.peek() == Some(&'"') => {
                chars.next();
                field.push('"');
            }
            Some('"') => break,
            Some('\n') => {
                *line += 1;
                field.push('\n');
            }
            Some(c) => field.push(c),
        }
    }

    match chars.peek() {
        None | Some(',') | Some('\n') => Ok(field),
        Some(_) => Err(MalformedRecord::at(*line, "extraneous text after quoted field")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_topics(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_first_fields() {
        let csv = "music,1\n\"food, cooking\",2\n\"the \"\"best\"\" movie\",3\n";
        assert_eq!(
            first_fields(csv).unwrap(),
            vec!["music", "food, cooking", r#"the "best" movie"#]
        );
    }

    #[test]
    fn test_quoted_field_may_span_lines() {
        let csv = "\"first line\nsecond line\",a\r\nnext,b\r\n";
        assert_eq!(
            first_fields(csv).unwrap(),
            vec!["first line\nsecond line", "next"]
        );
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        assert_eq!(first_fields("\nalpha\n\n\nbeta").unwrap(), vec!["alpha", "beta"]);
        assert!(first_fields("").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_records_are_rejected() {
        let bare_quote = first_fields("ok,1\nsay \"hi\",2\n").unwrap_err();
        assert_eq!(bare_quote.line, 2);

        let trailing = first_fields("\"quoted\"tail,1\n").unwrap_err();
        assert_eq!(trailing.line, 1);

        let unterminated = first_fields("a,1\n\"never closed,2\nmore\n").unwrap_err();
        assert_eq!(unterminated.line, 2);

        // Line numbers count the line breaks inside earlier quoted fields
        let ragged = first_fields("\"two\nlines\",1\nshort\n").unwrap_err();
        assert_eq!(ragged, MalformedRecord::at(3, "wrong number of fields"));
    }

    #[test]
    fn test_load_topics() {
        let file = write_topics("travel,x\n\n\"books, films\",y\n  space  ,z\n");

        let topics = Topics::load(file.path()).unwrap();
        assert_eq!(topics.as_slice(), &["travel", "books, films", "space"]);
        assert!(topics.as_slice().iter().all(|t| !t.is_empty()));
    }

    #[test]
    fn test_load_malformed_file_is_fatal() {
        let file = write_topics("good,1\nbad\n");
        let err = Topics::load(file.path()).unwrap_err();
        assert!(matches!(err, StartupError::MalformedTopics { line: 2, .. }));
    }

    #[test]
    fn test_load_sample_topics() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/topics.csv");
        let topics = Topics::load(path).unwrap();
        assert_eq!(topics.len(), 10);
    }

    #[test]
    fn test_load_missing_file_is_fatal() {
        let err = Topics::load("/definitely/not/here/topics.csv").unwrap_err();
        assert!(matches!(err, StartupError::Topics { .. }));
    }

    #[test]
    fn test_load_empty_file_is_fatal() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = Topics::load(file.path()).unwrap_err();
        assert!(matches!(err, StartupError::NoTopics(_)));
    }

    #[test]
    fn test_random_topic_is_from_list() {
        let topics = Topics::new(vec!["a".to_string(), "b".to_string()]).unwrap();
        for _ in 0..20 {
            assert!(["a", "b"].contains(&topics.random()));
        }
    }

    #[test]
    fn test_new_rejects_blank_topics() {
        assert!(Topics::new(vec![]).is_none());
        assert!(Topics::new(vec!["  ".to_string()]).is_none());
    }
}
