//! SQL text for the probes.
//!
//! Queries return raw engine units (pages, microseconds, byte offsets); the
//! probes convert them so the conversions stay unit-testable.

/// Latest scheduler monitor health record: `(record_id, system_idle)`.
pub(crate) const CPU_RING_BUFFER: &str = r"
;WITH parsed AS (
  SELECT
    CONVERT(xml, record).value('(./Record/@id)[1]', 'int') AS record_id,
    CONVERT(xml, record).value('(./Record/SchedulerMonitorEvent/SystemHealth/SystemIdle)[1]', 'int') AS system_idle
  FROM sys.dm_os_ring_buffers
  WHERE ring_buffer_type = N'RING_BUFFER_SCHEDULER_MONITOR'
    AND CAST(record AS nvarchar(max)) LIKE N'%<SystemHealth>%'
)
SELECT TOP 1 record_id, system_idle
FROM parsed
ORDER BY record_id DESC;
";

/// `(committed_kb, committed_target_kb)`.
pub(crate) const MEMORY_SYS_INFO: &str = "
SELECT CAST(committed_kb AS bigint), CAST(committed_target_kb AS bigint)
FROM sys.dm_os_sys_info;
";

/// `(memory_utilization_percentage)`.
pub(crate) const MEMORY_PROCESS: &str = "
SELECT memory_utilization_percentage
FROM sys.dm_os_process_memory;
";

/// `(database_name, file_name, file_type, physical_name, size_pages)`.
pub(crate) const STORAGE: &str = "
SELECT
    DB_NAME(mf.database_id) AS database_name,
    mf.name                 AS file_name,
    mf.type_desc            AS file_type,
    mf.physical_name        AS physical_name,
    CAST(mf.size AS bigint) AS size_pages
FROM sys.master_files AS mf
ORDER BY mf.database_id, mf.file_id;
";

/// `(database_name, last_backup)` for full backups only.
pub(crate) const LAST_BACKUP: &str = "
SELECT
    bs.database_name,
    MAX(bs.backup_finish_date) AS last_backup
FROM msdb.dbo.backupset AS bs
WHERE bs.type = 'D'
GROUP BY bs.database_name
ORDER BY bs.database_name;
";

/// `(schema_name, object_name, type_desc, missing_reference)`.
pub(crate) const INVALID_OBJECTS: &str = "
SELECT
    OBJECT_SCHEMA_NAME(d.referencing_id) AS schema_name,
    OBJECT_NAME(d.referencing_id)        AS object_name,
    o.type_desc,
    d.referenced_entity_name             AS missing_reference
FROM sys.sql_expression_dependencies AS d
JOIN sys.objects AS o
  ON o.object_id = d.referencing_id
WHERE d.referenced_id IS NULL
  AND d.is_ambiguous = 0
  AND o.is_ms_shipped = 0
ORDER BY schema_name, object_name;
";

/// Online user databases, excluding master, tempdb, model and msdb.
pub(crate) const USER_DATABASES: &str = "
SELECT name
FROM sys.databases
WHERE database_id > 4
  AND state = 0
ORDER BY database_id;
";

pub(crate) const BEGIN_TRANSACTION: &str = "BEGIN TRANSACTION;";
pub(crate) const COMMIT_TRANSACTION: &str = "COMMIT TRANSACTION;";
pub(crate) const ROLLBACK_TRANSACTION: &str =
    "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION;";

/// Fragment shared by every top-queries statement.
pub(crate) const TOP_QUERIES_SOURCE: &str = "sys.dm_exec_query_stats";

/// Top statements by cumulative worker time:
/// `(total_worker_time_us, execution_count, statement_start_offset, statement_end_offset, text)`.
pub(crate) fn build_top_queries_query(limit: usize) -> String {
    format!(
        "
SELECT TOP ({limit})
    qs.total_worker_time,
    qs.execution_count,
    qs.statement_start_offset,
    qs.statement_end_offset,
    CONVERT(nvarchar(max), qt.text) AS query_text
FROM {TOP_QUERIES_SOURCE} AS qs
CROSS APPLY sys.dm_exec_sql_text(qs.sql_handle) AS qt
ORDER BY qs.total_worker_time DESC;
"
    )
}

/// Per-database statistics refresh. `quoted_database` must already be bracket-quoted.
pub(crate) fn build_update_stats_command(quoted_database: &str) -> String {
    format!("EXEC {quoted_database}.sys.sp_updatestats;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_queries_query_embeds_limit() {
        let sql = build_top_queries_query(7);
        assert!(sql.contains("TOP (7)"));
        assert!(sql.contains("ORDER BY qs.total_worker_time DESC"));
    }

    #[test]
    fn update_stats_command_targets_database() {
        assert_eq!(
            build_update_stats_command("[Sales]"),
            "EXEC [Sales].sys.sp_updatestats;"
        );
    }
}
