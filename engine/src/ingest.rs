//! TSV ingest: parse the ratings file into records, sorted for loading.
//!
//! The expected format is a header row followed by one record per line,
//! with three tab-separated columns: `id`, `rating`, `votes`. Parse errors
//! carry 1-based line numbers, since malformed input is the one failure a
//! user can actually do something about.
//!
//! Records come back sorted ascending by `(rating, id)`, the load order
//! that fills data blocks in key order.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use bptree_api::types::{Rating, Record};

use crate::error::IngestError;

/// Read, parse and sort the ratings file at `path`.
pub fn load_records<P: AsRef<Path>>(path: P) -> Result<Vec<Record>, IngestError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if i == 0 || line.trim().is_empty() {
            // header row, trailing blank lines
            continue;
        }
        records.push(parse_line(&line, i + 1)?);
    }
    records.sort_by(|a, b| {
        a.rating
            .cmp(&b.rating)
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(records)
}

fn parse_line(line: &str, lineno: usize) -> Result<Record, IngestError> {
    let mut fields = line.split('\t');
    let missing = || IngestError::MissingField { line: lineno };
    let id = fields.next().ok_or_else(missing)?.trim();
    let rating = fields.next().ok_or_else(missing)?.trim();
    let votes = fields.next().ok_or_else(missing)?.trim();

    let rating: Rating = rating.parse().map_err(|source| IngestError::BadRating {
        line: lineno,
        source,
    })?;
    let votes: u32 = votes.parse().map_err(|source| IngestError::BadVotes {
        line: lineno,
        source,
    })?;
    Ok(Record {
        id: id.to_string(),
        rating,
        votes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fixture(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_and_sorts() {
        let file = write_fixture(
            "id\trating\tvotes\n\
             tt0000003\t6.5\t1901\n\
             tt0000001\t5.6\t1645\n\
             tt0000002\t5.6\t250\n",
        );
        let records = load_records(file.path()).unwrap();
        assert_eq!(records.len(), 3);
        // sorted by rating first, id second
        assert_eq!(records[0].id, "tt0000001");
        assert_eq!(records[1].id, "tt0000002");
        assert_eq!(records[2].id, "tt0000003");
        assert_eq!(records[2].votes, 1901);
        assert_eq!(records[0].rating, "5.6".parse().unwrap());
    }

    #[test]
    fn reports_line_numbers() {
        let file = write_fixture("id\trating\tvotes\ntt1\t7.1\t10\ntt2\tnope\t10\n");
        match load_records(file.path()) {
            Err(IngestError::BadRating { line, .. }) => assert_eq!(line, 3),
            other => panic!("unexpected result: {:?}", other.map(|r| r.len())),
        }

        let file = write_fixture("id\trating\tvotes\ntt1\t7.1\n");
        assert!(matches!(
            load_records(file.path()),
            Err(IngestError::MissingField { line: 2 })
        ));

        let file = write_fixture("id\trating\tvotes\ntt1\t7.1\tmany\n");
        assert!(matches!(
            load_records(file.path()),
            Err(IngestError::BadVotes { line: 2, .. })
        ));
    }
}
