//! Batch sessions: one reused connection per side for many table operations

use crate::backend::{ConnectionDescriptor, TableAdapter};
use crate::error::Result;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Scoped connection reuse. Created by
/// [`ComparisonService::begin_batch`](crate::service::ComparisonService::begin_batch);
/// ending it (explicitly or by drop) releases every connection it leased.
pub struct BatchSession {
    id: Uuid,
    members: Vec<(Arc<dyn TableAdapter>, ConnectionDescriptor)>,
    ended: bool,
}

impl BatchSession {
    /// Begin a batch on every connection, undoing earlier ones if one fails
    pub(crate) fn begin(connections: Vec<(Arc<dyn TableAdapter>, ConnectionDescriptor)>) -> Result<Self> {
        let mut session = Self {
            id: Uuid::new_v4(),
            members: Vec::with_capacity(connections.len()),
            ended: false,
        };
        for (adapter, conn) in connections {
            adapter.begin_batch(&conn)?;
            session.members.push((adapter, conn));
        }
        log::debug!("Started batch session {} over {} connection(s)", session.id, session.members.len());
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn connections(&self) -> impl Iterator<Item = &ConnectionDescriptor> {
        self.members.iter().map(|(_, conn)| conn)
    }

    /// Release all connections, reporting the first failure
    pub fn end(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if self.ended {
            return Ok(());
        }
        self.ended = true;
        let mut first_error = None;
        while let Some((adapter, conn)) = self.members.pop() {
            if let Err(err) = adapter.end_batch(&conn) {
                log::warn!("Failed to end batch on {}: {}", conn, err);
                first_error.get_or_insert(err);
            }
        }
        log::debug!("Ended batch session {}", self.id);
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for BatchSession {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

impl fmt::Debug for BatchSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let connections: Vec<String> = self.connections().map(|c| c.key()).collect();
        f.debug_struct("BatchSession")
            .field("id", &self.id)
            .field("connections", &connections)
            .field("ended", &self.ended)
            .finish()
    }
}
