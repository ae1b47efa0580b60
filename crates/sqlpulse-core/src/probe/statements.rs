//! Most expensive cached statements by cumulative CPU time.

use crate::model::QueryCostRecord;
use crate::source::{Connector, Row, SourceError};

use super::queries::build_top_queries_query;
use super::{FailureKind, Monitor, ProbeOutcome};

/// Number of statements returned when the caller does not ask for a limit.
pub const DEFAULT_TOP_QUERIES: usize = 5;

/// Statement text longer than this is cut, in characters.
pub const MAX_QUERY_TEXT_CHARS: usize = 4096;

impl<C: Connector> Monitor<C> {
    /// Top `limit` statements from the plan cache ordered by total worker time.
    ///
    /// Requires `VIEW SERVER STATE`; without it the query fails and the
    /// outcome carries `top_queries_failed`. A `limit` of zero returns an
    /// empty list without touching the server.
    pub async fn top_queries(&self, limit: usize) -> ProbeOutcome<Vec<QueryCostRecord>> {
        if limit == 0 {
            return ProbeOutcome::Ok(Vec::new());
        }

        let result = self
            .fetch(&build_top_queries_query(limit))
            .await
            .and_then(|rows| rows.iter().map(query_cost_record).collect::<Result<Vec<_>, _>>())
            .map(|mut records| {
                records.sort_by(|a, b| b.cpu_time_ms.total_cmp(&a.cpu_time_ms));
                records.truncate(limit);
                records
            });
        ProbeOutcome::from_result(FailureKind::TopQueriesFailed, result)
    }
}

fn query_cost_record(row: &Row) -> Result<QueryCostRecord, SourceError> {
    let worker_time_us = row.f64(0)?.unwrap_or(0.0).max(0.0);
    let execution_count = row.i64(1)?.unwrap_or(0).max(0);
    let start_offset = row.i64(2)?.unwrap_or(0);
    let end_offset = row.i64(3)?.unwrap_or(-1);
    let batch = row.text(4)?.unwrap_or_default();

    let cpu_time_ms = worker_time_us / 1000.0;
    let avg_cpu_time_ms = if execution_count > 0 {
        cpu_time_ms / execution_count as f64
    } else {
        0.0
    };

    let statement = statement_text(batch, start_offset, end_offset);
    Ok(QueryCostRecord {
        cpu_time_ms,
        execution_count,
        avg_cpu_time_ms,
        query: truncate_chars(statement.trim(), MAX_QUERY_TEXT_CHARS).to_string(),
    })
}

/// Cuts one statement out of its cached batch.
///
/// Offsets are byte positions into the UTF-16 batch text, so they count
/// 2-byte units. The end offset addresses the statement's last unit; `-1`
/// means "to the end of the batch". Offsets past the text are clamped.
pub(crate) fn statement_text(batch: &str, start_offset: i64, end_offset: i64) -> String {
    let units: Vec<u16> = batch.encode_utf16().collect();
    let total = units.len() as i64;

    let start_offset = start_offset.max(0);
    let end_offset = if end_offset == -1 {
        total * 2
    } else {
        end_offset
    };

    let count = (end_offset - start_offset) / 2 + 1;
    if count <= 0 {
        return String::new();
    }
    let start = (start_offset / 2).min(total);
    let end = (start + count).min(total);
    String::from_utf16_lossy(&units[start as usize..end as usize])
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
