use std::time::Instant;

use futures_util::future::BoxFuture;

use super::{
    common::{CursorCore, CursorState},
    find::FindSpec,
};
use crate::{
    bson::{doc, Document},
    cmap::{Command, Connection, GetMore, Query, QueryFlags, Reply},
    error::Result,
    sdam::{ServerDescription, ServerType},
    serde_util::duration_as_millis_i64,
    trace::command::{emit_command_failed, emit_command_started, emit_command_succeeded},
};

/// Runs a find as an OP_QUERY and fetches later batches with OP_GETMORE, or by reading the
/// replies an exhaust cursor streams.
#[derive(Clone, Debug)]
pub(crate) struct LegacyStrategy {
    spec: FindSpec,
}

impl LegacyStrategy {
    pub(crate) fn new(spec: FindSpec) -> Self {
        Self { spec }
    }

    pub(crate) async fn prime(&mut self, core: &mut CursorCore) -> CursorState {
        let server = match core.select_server().await {
            Ok(server) => server,
            Err(e) => return core.fail(e),
        };
        let query = match self.build_query(core, &server) {
            Ok(query) => query,
            Err(e) => return core.fail(e),
        };
        let connection = match core.client.checkout_connection(&server).await {
            Ok(connection) => connection,
            Err(e) => return core.fail(e),
        };

        let request = query.query.clone();
        round_trip(core, &server, connection, "find", &request, |connection| {
            Box::pin(async move { connection.query(&query).await })
        })
        .await
    }

    /// Translates the find options into an OP_QUERY. Options with no flag or message field
    /// become `$`-prefixed modifiers next to a `$query` wrapping the filter.
    fn build_query(&self, core: &CursorCore, server: &ServerDescription) -> Result<Query> {
        let options = &self.spec.options;

        let mut modifiers = Document::new();
        if let Some(ref sort) = options.sort {
            modifiers.insert("$orderby", sort.clone());
        }
        if let Some(ref comment) = options.comment {
            modifiers.insert("$comment", comment.as_str());
        }
        if let Some(ref hint) = options.hint {
            modifiers.insert("$hint", hint.clone());
        }
        if let Some(max_time) = options.max_time {
            modifiers.insert("$maxTimeMS", duration_as_millis_i64(max_time));
        }

        let mut flags = QueryFlags::empty();
        let cursor_options = &core.options;
        if cursor_options.tailable {
            flags |= QueryFlags::TAILABLE_CURSOR;
        }
        if cursor_options.await_data {
            flags |= QueryFlags::AWAIT_DATA;
        }
        if cursor_options.no_cursor_timeout {
            flags |= QueryFlags::NO_CURSOR_TIMEOUT;
        }
        if cursor_options.exhaust {
            flags |= QueryFlags::EXHAUST;
        }
        if cursor_options.allow_partial_results {
            flags |= QueryFlags::PARTIAL;
        }

        let mut routing = Command::new("find", &core.ns.db, Document::new());
        core.client.topology().update_command_with_read_pref(
            server.id,
            &mut routing,
            core.read_preference.as_ref(),
        );
        if routing.secondary_ok {
            flags |= QueryFlags::SECONDARY_OK;
        }
        if server.server_type() == ServerType::Mongos {
            if let Some(read_preference) = routing.read_preference() {
                modifiers.insert("$readPreference", crate::bson::to_bson(read_preference)?);
            }
        }

        let query = if modifiers.is_empty() {
            self.spec.filter.clone()
        } else {
            let mut wrapped = doc! { "$query": self.spec.filter.clone() };
            wrapped.extend(modifiers);
            wrapped
        };

        Ok(Query {
            flags,
            full_collection_name: core.ns.to_string(),
            number_to_skip: cursor_options.skip.clamp(0, i64::from(i32::MAX)) as i32,
            number_to_return: core.n_return(),
            query,
            return_fields_selector: options.projection.clone(),
        })
    }

    pub(crate) async fn get_next_batch(&mut self, core: &mut CursorCore) -> CursorState {
        get_more(core).await
    }
}

/// Fetches the next batch of a cursor that was opened with OP_QUERY. An exhaust cursor reads the
/// next streamed reply from its pinned connection instead of sending a request.
pub(crate) async fn get_more(core: &mut CursorCore) -> CursorState {
    if core.cursor_id == 0 {
        return CursorState::Done;
    }
    let server = match core.pinned_server() {
        Ok(server) => server,
        Err(e) => return core.fail(e),
    };

    if let Some(connection) = core.exhaust_connection.take() {
        let request = doc! { "getMore": core.cursor_id, "collection": core.ns.coll.as_str() };
        return round_trip(core, &server, connection, "getMore", &request, |connection| {
            Box::pin(connection.receive_exhaust_reply())
        })
        .await;
    }

    let get_more = GetMore {
        full_collection_name: core.ns.to_string(),
        number_to_return: if core.options.tailable {
            0
        } else {
            core.n_return()
        },
        cursor_id: core.cursor_id,
    };
    let connection = match core.client.checkout_connection(&server).await {
        Ok(connection) => connection,
        Err(e) => return core.fail(e),
    };
    let request = core.get_more_command().body;
    round_trip(core, &server, connection, "getMore", &request, |connection| {
        Box::pin(async move { connection.get_more(&get_more).await })
    })
    .await
}

/// Performs one legacy exchange on `connection` and loads the reply into the core. The
/// connection stays pinned while an exhaust cursor is still streaming; otherwise it goes back to
/// the cache.
async fn round_trip<F>(
    core: &mut CursorCore,
    server: &ServerDescription,
    mut connection: Connection,
    command_name: &str,
    request: &Document,
    exchange: F,
) -> CursorState
where
    F: for<'a> FnOnce(&'a mut Connection) -> BoxFuture<'a, Result<Reply>>,
{
    emit_command_started(
        command_name,
        &core.ns.db,
        request,
        connection.id,
        &connection.address,
    );
    let start = Instant::now();

    let result = exchange(&mut connection).await.and_then(|reply| {
        let summary = doc! {
            "cursorId": reply.cursor_id,
            "numberReturned": reply.number_returned,
        };
        core.read_reply(reply).map(|()| summary)
    });

    match result {
        Ok(summary) => {
            emit_command_succeeded(
                command_name,
                &summary,
                connection.id,
                &connection.address,
                start.elapsed(),
            );
            if core.options.exhaust && core.cursor_id != 0 {
                core.exhaust_connection = Some(connection);
            } else {
                core.client.checkin_connection(server.id, connection).await;
            }
            CursorState::InBatch
        }
        Err(e) => {
            emit_command_failed(
                command_name,
                &e,
                connection.id,
                &connection.address,
                start.elapsed(),
            );
            // An exhaust stream that failed part way cannot be resynchronized.
            if !core.options.exhaust {
                core.client.checkin_connection(server.id, connection).await;
            }
            core.client
                .topology()
                .handle_application_error(server.id, &e)
                .await;
            core.fail(e)
        }
    }
}
