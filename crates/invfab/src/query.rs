//! Query model, text parsing, and batch encoding for distribution.
//!
//! Query file format, one query per line:
//!
//! ```text
//! r: k1 k2 ... kn        read query, keys ascending
//! i: uid k1 ... kn       insert document id uid into lists k1..kn
//! d: uid k1 ... kn       parsed, but delete is not implemented
//! ```

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::constants::READ_BUFFER_LENGTH;
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryType {
    Read,
    Insert,
    Delete,
}

#[derive(Clone, Debug)]
pub struct Query {
    pub id: u32,
    pub kind: QueryType,
    pub update_id: u32,
    pub keys: Vec<u32>,
}

impl Query {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            QueryType::Read => write!(f, "{} [read]", self.id)?,
            QueryType::Insert => write!(f, "{} [insert: {}]", self.id, self.update_id)?,
            QueryType::Delete => write!(f, "{} [delete: {}]", self.id, self.update_id)?,
        }
        write!(f, " (len={}): {:?}", self.len(), self.keys)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct QueryFileStats {
    pub num_reads: u64,
    pub num_inserts: u64,
    pub num_deletes: u64,
    /// Largest key seen; the catalog universe must cover it.
    pub universe_size: u32,
}

/// Reads and validates a query file.
pub fn read_queries(path: &Path) -> Result<(Vec<Query>, QueryFileStats)> {
    log::info!("read queries from {}", path.display());
    let file = File::open(path)?;
    let mut queries = Vec::new();
    let mut stats = QueryFileStats::default();

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let bad = |msg: &str| Error::InvalidQuery(format!("line {}: {msg}", line_no + 1));

        let (prefix, rest) = line
            .split_once(':')
            .ok_or_else(|| bad("missing query type"))?;

        let kind = match prefix.trim() {
            "r" => QueryType::Read,
            "i" => QueryType::Insert,
            "d" => QueryType::Delete,
            other => return Err(bad(&format!("invalid query type '{other}'"))),
        };

        let mut numbers = Vec::new();
        for token in rest.split_whitespace() {
            numbers.push(
                token
                    .parse::<u32>()
                    .map_err(|_| bad(&format!("invalid number '{token}'")))?,
            );
        }

        let update_id = if kind == QueryType::Read {
            0
        } else {
            if numbers.is_empty() {
                return Err(bad("update query without document id"));
            }
            numbers.remove(0)
        };

        if numbers.is_empty() {
            return Err(bad("query without keys"));
        }
        if numbers.len() > READ_BUFFER_LENGTH {
            return Err(bad(&format!(
                "query has {} keys, maximum is {READ_BUFFER_LENGTH}",
                numbers.len()
            )));
        }

        match kind {
            QueryType::Read => stats.num_reads += 1,
            QueryType::Insert => stats.num_inserts += 1,
            QueryType::Delete => stats.num_deletes += 1,
        }
        if let Some(&max) = numbers.iter().max() {
            stats.universe_size = stats.universe_size.max(max);
        }

        queries.push(Query {
            id: queries.len() as u32,
            kind,
            update_id,
            keys: numbers,
        });
    }

    Ok((queries, stats))
}

/// Splits queries round-robin by `id % num_nodes` into flat word batches
/// for the bootstrap channel:
/// `[num_queries, (id, type, update_id, num_keys, keys...) ...]`.
pub fn encode_batches(queries: &[Query], num_nodes: u32) -> Vec<Vec<u32>> {
    let mut batches = vec![vec![0u32]; num_nodes as usize];

    for q in queries {
        let batch = &mut batches[(q.id % num_nodes) as usize];
        batch[0] += 1;
        batch.extend([q.id, q.kind as u32, q.update_id, q.keys.len() as u32]);
        batch.extend(&q.keys);
    }

    batches
}

/// Inverse of one `encode_batches` element.
pub fn decode_batch(batch: &[u32]) -> Result<Vec<Query>> {
    let corrupt = || Error::Protocol("truncated query batch".into());
    let mut iter = batch.iter().copied();
    let num_queries = iter.next().ok_or_else(corrupt)?;
    let mut queries = Vec::with_capacity(num_queries as usize);

    for _ in 0..num_queries {
        let id = iter.next().ok_or_else(corrupt)?;
        let kind = match iter.next().ok_or_else(corrupt)? {
            0 => QueryType::Read,
            1 => QueryType::Insert,
            2 => QueryType::Delete,
            k => return Err(Error::Protocol(format!("unknown query type {k}"))),
        };
        let update_id = iter.next().ok_or_else(corrupt)?;
        let num_keys = iter.next().ok_or_else(corrupt)? as usize;
        let keys: Vec<u32> = iter.by_ref().take(num_keys).collect();
        if keys.len() != num_keys {
            return Err(corrupt());
        }
        queries.push(Query {
            id,
            kind,
            update_id,
            keys,
        });
    }

    Ok(queries)
}
