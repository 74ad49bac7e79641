//! Per-dialect SQL for the message table.
//!
//! Both dialects share one shape; they differ in placeholder syntax, the
//! timestamp representation, and how the claim sub-query guards against
//! concurrent claimants.

use chrono::{DateTime, SecondsFormat, Utc};

pub(crate) mod sqlite {
    pub const SEND: &str = "insert into sqlq (queue, body, timeout, priority) \
         values (?, ?, ?, ?) returning id";

    // SQLite serializes writers, so the sub-select and update are atomic.
    // `created` has millisecond resolution; rowid keeps FIFO order inside one millisecond.
    pub const RECEIVE: &str = r#"
        update sqlq
        set
            timeout = ?,
            received = received + 1
        where id = (
            select id from sqlq
            where
                queue = ? and
                ? >= timeout and
                received < ?
            order by priority desc, created, rowid
            limit 1
        )
        returning id, body, priority, received
        "#;

    pub const EXTEND: &str = "update sqlq set timeout = ? where queue = ? and id = ?";

    pub const DELETE: &str = "delete from sqlq where queue = ? and id = ?";
}

pub(crate) mod postgres {
    pub const SEND: &str = "insert into sqlq (queue, body, timeout, priority) \
         values ($1, $2, $3, $4) returning id";

    // SKIP LOCKED keeps two concurrent claimants from both updating the row
    // picked by the sub-query under READ COMMITTED.
    pub const RECEIVE: &str = r#"
        update sqlq
        set
            timeout = $1,
            received = received + 1
        where id = (
            select id from sqlq
            where
                queue = $2 and
                $3 >= timeout and
                received < $4
            order by priority desc, created
            limit 1
            for update skip locked
        )
        returning id, body, priority, received
        "#;

    pub const EXTEND: &str = "update sqlq set timeout = $1 where queue = $2 and id = $3";

    pub const DELETE: &str = "delete from sqlq where queue = $1 and id = $2";
}

/// Text form of a timestamp as stored by SQLite: RFC 3339, UTC, fixed millisecond precision.
///
/// The fixed width keeps lexicographic and chronological order identical and
/// matches `strftime('%Y-%m-%dT%H:%M:%fZ')` used by the column defaults.
pub(crate) fn sqlite_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
