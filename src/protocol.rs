//! Wire protocol: tab-delimited request and response records.
//!
//! One request per line: `id \t working_directory [\t diff_flag]`, newline
//! terminated. The id is an opaque byte sequence echoed verbatim. A
//! missing diff flag means "compute the diff", so older shell integrations
//! that send two fields keep working.
//!
//! The response is a single line of 17 tab-separated fields in fixed
//! order; a failed request echoes only the id. Numeric fields are decimal,
//! the head commit is 40 lowercase hex characters or empty for an unborn
//! head.

use crate::errors::RequestParseError;
use crate::repo::oid::ObjectId;

/// A parsed request line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub id: Vec<u8>,
    pub dir: Vec<u8>,
    pub diff: bool,
}

/// Parses one request line (without the trailing newline).
pub fn parse_request(line: &[u8]) -> Result<Request, RequestParseError> {
    if line.is_empty() {
        return Err(RequestParseError::Empty);
    }
    let mut fields = line.split(|&b| b == b'\t');
    let id = fields.next().unwrap_or_default();
    let Some(dir) = fields.next() else {
        return Err(RequestParseError::FieldCount { got: 1 });
    };
    let diff = match fields.next() {
        None => true,
        Some(b"1") => true,
        Some(b"0") => false,
        Some(_) => return Err(RequestParseError::BadDiffFlag),
    };
    if fields.next().is_some() {
        let got = 4 + fields.count();
        return Err(RequestParseError::FieldCount { got });
    }

    Ok(Request {
        id: id.to_vec(),
        dir: dir.to_vec(),
        diff,
    })
}

/// All payload fields of a successful response, in wire order.
#[derive(Clone, Debug, Default)]
pub struct StatusResponse {
    /// Absolute working directory, no trailing separator.
    pub workdir: Vec<u8>,
    /// Head commit; `None` for an unborn head.
    pub head_commit: Option<ObjectId>,
    /// Local branch name; empty when detached.
    pub local_branch: String,
    pub upstream_branch: String,
    pub upstream_remote_name: String,
    pub upstream_remote_url: String,
    /// In-progress operation (`merge`, `rebase-i`, ...) or empty.
    pub repo_action: &'static str,
    pub index_size: u64,
    pub num_staged: u64,
    pub num_unstaged: u64,
    pub num_conflicted: u64,
    pub num_untracked: u64,
    pub commits_ahead: u64,
    pub commits_behind: u64,
    pub num_stashes: u64,
    /// Lexicographically-last tag at head, or empty.
    pub tag_at_head: String,
}

impl StatusResponse {
    /// Encodes the full 17-field record.
    #[must_use]
    pub fn encode(&self, id: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(id.len() + self.workdir.len() + 128);
        out.extend_from_slice(id);
        push_field(&mut out, &self.workdir);
        match self.head_commit {
            Some(oid) => {
                out.push(b'\t');
                oid.write_hex(&mut out);
            }
            None => out.push(b'\t'),
        }
        push_field(&mut out, self.local_branch.as_bytes());
        push_field(&mut out, self.upstream_branch.as_bytes());
        push_field(&mut out, self.upstream_remote_name.as_bytes());
        push_field(&mut out, self.upstream_remote_url.as_bytes());
        push_field(&mut out, self.repo_action.as_bytes());
        for value in [
            self.index_size,
            self.num_staged,
            self.num_unstaged,
            self.num_conflicted,
            self.num_untracked,
            self.commits_ahead,
            self.commits_behind,
            self.num_stashes,
        ] {
            push_number(&mut out, value);
        }
        push_field(&mut out, self.tag_at_head.as_bytes());
        out.push(b'\n');
        out
    }
}

/// Encodes the id-only record emitted for failed requests.
#[must_use]
pub fn encode_empty(id: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(id.len() + 1);
    out.extend_from_slice(id);
    out.push(b'\n');
    out
}

#[inline]
fn push_field(out: &mut Vec<u8>, field: &[u8]) {
    out.push(b'\t');
    out.extend_from_slice(field);
}

#[inline]
fn push_number(out: &mut Vec<u8>, value: u64) {
    out.push(b'\t');
    let mut buf = [0u8; 20];
    let mut pos = buf.len();
    let mut value = value;
    loop {
        pos -= 1;
        buf[pos] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 {
            break;
        }
    }
    out.extend_from_slice(&buf[pos..]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_and_three_field_requests() {
        let req = parse_request(b"A1\t/tmp/repo\t0").unwrap();
        assert_eq!(req.id, b"A1");
        assert_eq!(req.dir, b"/tmp/repo");
        assert!(!req.diff);

        let req = parse_request(b"A2\t/tmp/repo").unwrap();
        assert!(req.diff, "missing diff flag defaults to 1");
    }

    #[test]
    fn rejects_malformed_requests() {
        assert_eq!(parse_request(b""), Err(RequestParseError::Empty));
        assert_eq!(
            parse_request(b"lonely-id"),
            Err(RequestParseError::FieldCount { got: 1 })
        );
        assert_eq!(
            parse_request(b"id\t/d\t2"),
            Err(RequestParseError::BadDiffFlag)
        );
        assert_eq!(
            parse_request(b"id\t/d\t1\textra"),
            Err(RequestParseError::FieldCount { got: 4 })
        );
    }

    #[test]
    fn empty_id_is_preserved() {
        let req = parse_request(b"\t/tmp/repo\t1").unwrap();
        assert!(req.id.is_empty());
    }

    #[test]
    fn encodes_field_order_and_counts() {
        let response = StatusResponse {
            workdir: b"/tmp/r".to_vec(),
            head_commit: None,
            local_branch: "master".to_string(),
            ..StatusResponse::default()
        };
        let line = response.encode(b"A");
        assert_eq!(
            line,
            b"A\t/tmp/r\t\tmaster\t\t\t\t\t0\t0\t0\t0\t0\t0\t0\t0\t\n"
        );
    }

    #[test]
    fn encodes_numbers_without_allocation_artifacts() {
        let response = StatusResponse {
            workdir: b"/r".to_vec(),
            index_size: 12345,
            num_staged: 1,
            tag_at_head: "v1.2".to_string(),
            ..StatusResponse::default()
        };
        let line = response.encode(b"id");
        let text = String::from_utf8(line).unwrap();
        let fields: Vec<&str> = text.trim_end_matches('\n').split('\t').collect();
        assert_eq!(fields.len(), 17);
        assert_eq!(fields[8], "12345");
        assert_eq!(fields[9], "1");
        assert_eq!(fields[16], "v1.2");
    }

    #[test]
    fn empty_response_is_id_only() {
        assert_eq!(encode_empty(b"xyz"), b"xyz\n");
    }
}
