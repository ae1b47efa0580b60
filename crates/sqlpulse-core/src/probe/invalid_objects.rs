//! Modules with unresolved references ("invalid objects").

use crate::model::InvalidObjectRecord;
use crate::source::{Connector, Row, SourceError};

use super::queries::INVALID_OBJECTS;
use super::{FailureKind, Monitor, ProbeOutcome};

impl<C: Connector> Monitor<C> {
    /// Views, procedures, functions and triggers of the connected database
    /// whose body references an entity that no longer resolves.
    ///
    /// One record per unresolved dependency edge, so an object with two
    /// dangling references yields two records. Ambiguous references and
    /// engine-shipped objects are excluded.
    pub async fn invalid_objects(&self) -> ProbeOutcome<Vec<InvalidObjectRecord>> {
        let result = self.fetch(INVALID_OBJECTS).await.and_then(|rows| {
            rows.iter()
                .map(invalid_object_record)
                .collect::<Result<Vec<_>, _>>()
        });
        ProbeOutcome::from_result(FailureKind::InvalidObjectsFailed, result)
    }
}

fn invalid_object_record(row: &Row) -> Result<InvalidObjectRecord, SourceError> {
    Ok(InvalidObjectRecord {
        schema: row.text_or_empty(0)?,
        object_name: row.text_or_empty(1)?,
        object_type: row.text_or_empty(2)?,
        missing_reference: row.text_or_empty(3)?,
    })
}
