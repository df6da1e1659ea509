//! Vote log parser using nom
//!
//! File format:
//! ```text
//! VOTE001
//! [version: u32]
//! [record_count: u32]
//! ...records (\n-terminated)...
//! ```
//!
//! Record format:
//! ```text
//! put: <id>,<reviewId>,<userId>,<up|down>,<votedAtMillis>
//! del: <id>
//! ```

use chrono::DateTime;
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag},
    character::complete::{char, digit1},
    combinator::{map, map_opt, map_res, value},
    multi::many0,
    sequence::{preceded, terminated, tuple},
    IResult,
};

use crate::error::{Error, Result};
use crate::model::{Vote, VoteType};

/// Magic header for vote log files
pub const VOTE_MAGIC: &[u8] = b"VOTE001\n";

/// Current log format version
pub const VOTE_LOG_VERSION: u32 = 1;

/// Length of the full header (magic + version + record count)
pub const HEADER_LEN: usize = VOTE_MAGIC.len() + 8;

/// Vote log header
#[derive(Debug, Clone, PartialEq)]
pub struct VoteLogHeader {
    /// File format version
    pub version: u32,
    /// Number of records at last clean close
    pub record_count: u32,
}

/// One mutation in the vote log
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// Vote created or replaced
    Put(Vote),
    /// Vote removed
    Delete(String),
}

/// Parse vote log header
///
/// Format:
/// ```text
/// VOTE001\n
/// [4 bytes: version u32 little-endian]
/// [4 bytes: record_count u32 little-endian]
/// ```
pub fn parse_header(input: &[u8]) -> Result<VoteLogHeader> {
    if input.len() < HEADER_LEN {
        return Err(Error::Parse("Input too short for header".to_string()));
    }

    if &input[0..VOTE_MAGIC.len()] != VOTE_MAGIC {
        return Err(Error::Parse("Invalid vote log magic header".to_string()));
    }

    let mut version = [0u8; 4];
    version.copy_from_slice(&input[VOTE_MAGIC.len()..VOTE_MAGIC.len() + 4]);
    let mut record_count = [0u8; 4];
    record_count.copy_from_slice(&input[VOTE_MAGIC.len() + 4..HEADER_LEN]);

    Ok(VoteLogHeader {
        version: u32::from_le_bytes(version),
        record_count: u32::from_le_bytes(record_count),
    })
}

/// Create a vote log header
pub fn create_header(version: u32, record_count: u32) -> Vec<u8> {
    let mut header = Vec::with_capacity(HEADER_LEN);
    header.extend_from_slice(VOTE_MAGIC);
    header.extend_from_slice(&version.to_le_bytes());
    header.extend_from_slice(&record_count.to_le_bytes());
    header
}

fn field(input: &[u8]) -> IResult<&[u8], String> {
    map_res(is_not(",\n"), |bytes: &[u8]| {
        std::str::from_utf8(bytes).map(str::to_string)
    })(input)
}

fn vote_type(input: &[u8]) -> IResult<&[u8], VoteType> {
    alt((
        value(VoteType::Up, tag("up")),
        value(VoteType::Down, tag("down")),
    ))(input)
}

fn millis(input: &[u8]) -> IResult<&[u8], i64> {
    map_res(map_res(digit1, std::str::from_utf8), str::parse::<i64>)(input)
}

fn put_record(input: &[u8]) -> IResult<&[u8], Record> {
    map_opt(
        preceded(
            tag("put: "),
            tuple((
                terminated(field, char(',')),
                terminated(field, char(',')),
                terminated(field, char(',')),
                terminated(vote_type, char(',')),
                millis,
            )),
        ),
        |(id, review_id, user_id, vote_type, ms)| {
            DateTime::from_timestamp_millis(ms).map(|voted_at| {
                Record::Put(Vote {
                    id,
                    review_id,
                    user_id,
                    vote_type,
                    voted_at,
                })
            })
        },
    )(input)
}

fn delete_record(input: &[u8]) -> IResult<&[u8], Record> {
    map(preceded(tag("del: "), field), Record::Delete)(input)
}

/// Parse a single newline-terminated record
pub fn parse_record(input: &[u8]) -> IResult<&[u8], Record> {
    terminated(alt((put_record, delete_record)), char('\n'))(input)
}

/// Records recovered from a log body
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLog {
    /// Complete records, in log order
    pub records: Vec<Record>,
    /// Bytes of the body covered by `records`
    pub valid_len: usize,
    /// Bytes of an unterminated final record left by an interrupted append
    pub torn_len: usize,
}

/// Parse every record in a log body (everything after the header)
///
/// A final segment without a newline is an append that never finished; it is
/// reported in `torn_len` rather than failing. Anything unparseable before the
/// last newline is corruption and fails with [`Error::Parse`].
pub fn parse_records(input: &[u8]) -> Result<ParsedLog> {
    let (rest, records) = many0(parse_record)(input)?;
    if rest.contains(&b'\n') {
        return Err(Error::Parse(format!(
            "Unparseable record after {} records ({} trailing bytes)",
            records.len(),
            rest.len()
        )));
    }
    Ok(ParsedLog {
        records,
        valid_len: input.len() - rest.len(),
        torn_len: rest.len(),
    })
}

/// Serialize a record, including the trailing newline
pub fn encode_record(record: &Record) -> Vec<u8> {
    match record {
        Record::Put(vote) => format!(
            "put: {},{},{},{},{}\n",
            vote.id,
            vote.review_id,
            vote.user_id,
            vote.vote_type,
            vote.voted_at.timestamp_millis()
        )
        .into_bytes(),
        Record::Delete(id) => format!("del: {}\n", id).into_bytes(),
    }
}

/// Check that a value can be written as a record field
pub fn validate_field(name: &'static str, value: &str) -> Result<()> {
    if value.is_empty() || value.contains([',', '\n']) {
        return Err(Error::InvalidField(name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vote() -> Vote {
        Vote {
            id: "v1".to_string(),
            review_id: "rev1".to_string(),
            user_id: "u1".to_string(),
            vote_type: VoteType::Down,
            voted_at: DateTime::from_timestamp_millis(1_700_000_000_123).unwrap(),
        }
    }

    #[test]
    fn test_parse_header() {
        let header = create_header(VOTE_LOG_VERSION, 42);
        let parsed = parse_header(&header).unwrap();

        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.record_count, 42);
    }

    #[test]
    fn test_parse_header_invalid_magic() {
        let mut header = create_header(1, 0);
        header[0] = b'X';

        assert!(parse_header(&header).is_err());
    }

    #[test]
    fn test_parse_header_too_short() {
        assert!(parse_header(b"VOTE001\n").is_err());
    }

    #[test]
    fn test_parse_put_record() {
        let input = b"put: v1,rev1,u1,down,1700000000123\nrest";
        let (remaining, record) = parse_record(input).unwrap();

        assert_eq!(record, Record::Put(sample_vote()));
        assert_eq!(remaining, b"rest");
    }

    #[test]
    fn test_parse_delete_record() {
        let (remaining, record) = parse_record(b"del: v1\n").unwrap();
        assert_eq!(record, Record::Delete("v1".to_string()));
        assert!(remaining.is_empty());
    }

    #[test]
    fn test_encoded_records_parse_back() {
        let mut log = encode_record(&Record::Put(sample_vote()));
        log.extend(encode_record(&Record::Delete("v1".to_string())));

        let parsed = parse_records(&log).unwrap();
        assert_eq!(parsed.torn_len, 0);
        assert_eq!(parsed.valid_len, log.len());
        assert_eq!(
            parsed.records,
            vec![Record::Put(sample_vote()), Record::Delete("v1".to_string())]
        );
    }

    #[test]
    fn test_parse_records_rejects_garbage() {
        let result = parse_records(b"del: v1\nput: broken\n");
        assert!(matches!(result, Err(Error::Parse(_))));

        // Bad record followed by good ones is still corruption
        let result = parse_records(b"put: broken\ndel: v1\ndel: v2");
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[test]
    fn test_parse_records_torn_tail() {
        let parsed = parse_records(b"del: v1\nput: vote-1,rev1,u2,do").unwrap();

        assert_eq!(parsed.records, vec![Record::Delete("v1".to_string())]);
        assert_eq!(parsed.valid_len, 8);
        assert_eq!(parsed.torn_len, 22);
    }

    #[test]
    fn test_parse_rejects_unknown_vote_type() {
        assert!(parse_record(b"put: v1,rev1,u1,meh,1\n").is_err());
    }

    #[test]
    fn test_validate_field() {
        assert!(validate_field("userId", "u1").is_ok());
        assert!(validate_field("userId", "").is_err());
        assert!(validate_field("userId", "a,b").is_err());
        assert!(validate_field("userId", "a\nb").is_err());
    }
}
