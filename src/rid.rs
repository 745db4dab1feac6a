//! Resource ID (RID) parsing.
//!
//! A RID is an opaque per-document identifier assigned by the server. It decomposes into
//! three sub-ids: the database, the collection, and the document itself. Within a single
//! cross-partition query every document comes from the same database and collection, so the
//! only sub-id that ever needs comparing across documents is the document sub-id — but the
//! resume filter (`crate::resume`) still has to verify the other two agree, to catch a
//! continuation token that's been pointed at the wrong collection.
//!
//! RIDs observed on the wire are three opaque segments joined by `!`, e.g. `"2Q==!Zg==!ABsd"`.
//! This isn't a cryptographic or compressed format, just a stable, totally-ordered opaque
//! string per segment.

use std::cmp::Ordering;

use crate::ErrorKind;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ResourceId {
    pub database: String,
    pub collection: String,
    pub document: String,
}

impl ResourceId {
    /// Parses a RID of the form `database!collection!document`.
    pub fn parse(raw: &str) -> crate::Result<ResourceId> {
        let mut parts = raw.splitn(3, '!');
        let (Some(database), Some(collection), Some(document)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(ErrorKind::MalformedContinuation
                .with_message(format!("RID '{raw}' is not in database!collection!document form")));
        };
        if parts.next().is_some() {
            return Err(
                ErrorKind::MalformedContinuation.with_message(format!("RID '{raw}' has too many segments"))
            );
        }
        Ok(ResourceId {
            database: database.to_string(),
            collection: collection.to_string(),
            document: document.to_string(),
        })
    }

    pub fn to_raw(&self) -> String {
        format!("{}!{}!{}", self.database, self.collection, self.document)
    }

    /// Compares only the document sub-id, which is the only part that's meaningful once two
    /// RIDs are already known to share a database and collection.
    pub fn compare_document(&self, other: &ResourceId) -> Ordering {
        self.document.cmp(&other.document)
    }

    /// Returns an error unless `self` and `other` agree on database and collection.
    pub fn require_same_container(&self, other: &ResourceId) -> crate::Result<()> {
        if self.database != other.database || self.collection != other.collection {
            return Err(ErrorKind::MalformedContinuation.with_message(format!(
                "RID '{}' is not from the same database/collection as '{}'",
                self.to_raw(),
                other.to_raw()
            )));
        }
        Ok(())
    }
}
