use super::{
    command::{CommandStrategy, FIND_COMMAND_WIRE_VERSION},
    common::{CursorCore, CursorOptions, CursorState},
    legacy::LegacyStrategy,
};
use crate::{
    bson::{doc, Document},
    coll::{options::FindOptions, Namespace},
    error::Result,
    trace::CURSOR_TRACING_EVENT_TARGET,
};

/// The filter and options a find was created with.
#[derive(Clone, Debug, Default)]
pub(crate) struct FindSpec {
    pub(crate) filter: Document,
    pub(crate) options: FindOptions,
}

impl FindSpec {
    pub(crate) fn cursor_options(&self) -> CursorOptions {
        let options = &self.options;
        let cursor_type = options.cursor_type();
        CursorOptions {
            batch_size: options.batch_size,
            limit: options.limit.unwrap_or(0),
            skip: options.skip.unwrap_or(0),
            tailable: cursor_type.is_tailable(),
            await_data: cursor_type.is_await_data(),
            max_await_time: options.max_await_time,
            no_cursor_timeout: options.no_cursor_timeout.unwrap_or(false),
            allow_partial_results: options.allow_partial_results.unwrap_or(false),
            exhaust: options.exhaust(),
        }
    }

    /// The find command for servers that support it.
    pub(crate) fn to_command(&self, ns: &Namespace) -> Result<Document> {
        let mut command = doc! {
            "find": ns.coll.as_str(),
            "filter": self.filter.clone(),
        };
        command.extend(crate::bson::to_document(&self.options)?);

        match self.options.limit {
            Some(limit) if limit < 0 => {
                command.insert("limit", -limit);
                command.insert("singleBatch", true);
            }
            Some(limit) if limit > 0 => {
                command.insert("limit", limit);
            }
            _ => {}
        }

        let cursor_type = self.options.cursor_type();
        if cursor_type.is_tailable() {
            command.insert("tailable", true);
        }
        if cursor_type.is_await_data() {
            command.insert("awaitData", true);
        }
        Ok(command)
    }
}

/// Which protocol a find ended up using.
#[derive(Clone, Debug)]
enum Decided {
    Command(CommandStrategy),
    Legacy(LegacyStrategy),
}

/// Defers the choice between the find command and OP_QUERY until a server has been selected.
/// The choice is made on the first prime and never revisited.
#[derive(Clone, Debug)]
pub(crate) struct FindStrategy {
    spec: FindSpec,
    decided: Option<Decided>,
}

impl FindStrategy {
    pub(crate) fn new(spec: FindSpec) -> Self {
        Self {
            spec,
            decided: None,
        }
    }

    pub(crate) async fn prime(&mut self, core: &mut CursorCore) -> CursorState {
        let server = match core.select_server().await {
            Ok(server) => server,
            Err(e) => return core.fail(e),
        };

        let wire_version = server.max_wire_version().unwrap_or(0);
        let decided = if wire_version >= FIND_COMMAND_WIRE_VERSION && !core.options.exhaust {
            match self.spec.to_command(&core.ns) {
                Ok(command) => Decided::Command(CommandStrategy::new(core.ns.db.clone(), command)),
                Err(e) => return core.fail(e),
            }
        } else {
            Decided::Legacy(LegacyStrategy::new(self.spec.clone()))
        };
        tracing::debug!(
            target: CURSOR_TRACING_EVENT_TARGET,
            operationId = core.operation_id,
            maxWireVersion = wire_version,
            legacy = matches!(decided, Decided::Legacy(_)),
            "Find protocol chosen"
        );

        match self.decided.insert(decided) {
            Decided::Command(strategy) => strategy.prime(core).await,
            Decided::Legacy(strategy) => strategy.prime(core).await,
        }
    }

    pub(crate) async fn get_next_batch(&mut self, core: &mut CursorCore) -> CursorState {
        match self.decided {
            Some(Decided::Command(ref mut strategy)) => strategy.get_next_batch(core).await,
            Some(Decided::Legacy(ref mut strategy)) => strategy.get_next_batch(core).await,
            None => CursorState::Done,
        }
    }

    /// An undecided find with the same filter and options.
    pub(crate) fn fresh(&self) -> Self {
        Self::new(self.spec.clone())
    }
}
