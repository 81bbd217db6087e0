use serde::{de::DeserializeOwned, Serialize};

use crate::{
    bson::{Bson, Document},
    client::{options::ServerAddress, ClusterTime},
    error::{CommandError, Error, ErrorKind, Result},
    selection_criteria::ReadPreference,
};

/// Driver-side model of a database command.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Serialize, Default)]
pub(crate) struct Command {
    #[serde(skip)]
    pub(crate) name: String,

    /// Sets the secondaryOk bit when the command travels as OP_QUERY.
    #[serde(skip)]
    pub(crate) secondary_ok: bool,

    #[serde(flatten)]
    pub(crate) body: Document,

    #[serde(rename = "$db")]
    pub(crate) target_db: String,

    #[serde(rename = "$clusterTime")]
    cluster_time: Option<ClusterTime>,

    #[serde(rename = "$readPreference")]
    read_preference: Option<ReadPreference>,
}

impl Command {
    pub(crate) fn new(name: impl ToString, target_db: impl ToString, body: Document) -> Self {
        Self {
            name: name.to_string(),
            target_db: target_db.to_string(),
            body,
            ..Default::default()
        }
    }

    pub(crate) fn set_cluster_time(&mut self, cluster_time: &ClusterTime) {
        self.cluster_time = Some(cluster_time.clone());
    }

    pub(crate) fn set_read_preference(&mut self, read_preference: ReadPreference) {
        self.read_preference = Some(read_preference);
    }

    pub(crate) fn read_preference(&self) -> Option<&ReadPreference> {
        self.read_preference.as_ref()
    }

    /// The document sent in an OP_MSG body.
    pub(crate) fn to_op_msg_document(&self) -> Result<Document> {
        Ok(crate::bson::to_document(self)?)
    }

    /// The document sent as the query of an OP_QUERY against `<db>.$cmd`. Legacy servers do not
    /// understand `$db` or `$clusterTime`, and mongos expects the read preference wrapped
    /// alongside a `$query` field.
    pub(crate) fn to_op_query_document(&self) -> Result<Document> {
        let body = self.body.clone();
        match self.read_preference {
            Some(ref read_preference) => {
                let mut wrapped = Document::new();
                wrapped.insert("$query", body);
                wrapped.insert(
                    "$readPreference",
                    crate::bson::to_bson(read_preference)?,
                );
                Ok(wrapped)
            }
            None => Ok(body),
        }
    }
}

/// A reply to a command, tagged with the address of the server that sent it.
#[derive(Debug, Clone)]
pub(crate) struct RawCommandResponse {
    pub(crate) source: ServerAddress,
    raw: Document,
}

impl RawCommandResponse {
    pub(crate) fn new(source: ServerAddress, raw: Document) -> Self {
        Self { source, raw }
    }

    pub(crate) fn body<T: DeserializeOwned>(&self) -> Result<T> {
        crate::bson::from_document(self.raw.clone()).map_err(|e| {
            Error::from(ErrorKind::InvalidResponse {
                message: format!("{}", e),
            })
        })
    }

    pub(crate) fn raw_body(&self) -> &Document {
        &self.raw
    }

    pub(crate) fn into_raw_body(self) -> Document {
        self.raw
    }

    pub(crate) fn is_success(&self) -> bool {
        match self.raw.get("ok") {
            Some(Bson::Double(ok)) => *ok == 1.0,
            Some(Bson::Int32(ok)) => *ok == 1,
            Some(Bson::Int64(ok)) => *ok == 1,
            Some(Bson::Boolean(ok)) => *ok,
            _ => false,
        }
    }

    pub(crate) fn cluster_time(&self) -> Option<ClusterTime> {
        self.raw
            .get_document("$clusterTime")
            .ok()
            .and_then(|doc| crate::bson::from_document(doc.clone()).ok())
    }

    /// Returns an error built from the reply if the server reported failure.
    pub(crate) fn validate(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let mut command_error: CommandError = self.body().unwrap_or_else(|_| {
            CommandError::new(0, "Unknown command error")
        });
        if command_error.message.is_empty() {
            if let Ok(message) = self.raw.get_str("$err") {
                command_error.message = message.to_string();
            }
        }
        Err(Error::from(ErrorKind::Command(command_error)).with_server_response(self.raw))
    }
}
