pub mod options;

use std::{fmt, str::FromStr};

use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize};

use self::options::{AggregateOptions, FindOptions};
use crate::{
    bson::{doc, Bson, Document},
    change_stream::{options::ChangeStreamOptions, ChangeStream, ChangeStreamTarget},
    cursor::{Cursor, CursorOptions},
    error::{Error, Result},
    Client,
    Database,
};

/// `Collection` is the client-side abstraction of a MongoDB Collection. It is obtained through
/// [`Database::collection`](crate::Database::collection) and performs no I/O until one of its
/// cursors is iterated.
///
/// `Collection` holds a [`Client`], which uses [`std::sync::Arc`] internally, so it is cheap to
/// clone.
///
/// # Example
/// ```rust,no_run
/// # use mongoc::{bson::doc, error::Result, options::FindOptions, Client};
/// # async fn run() -> Result<()> {
/// let client = Client::with_uri_str("mongodb://localhost:27017")?;
/// let coll = client.database("inventory").collection("items");
///
/// let options = FindOptions::builder().batch_size(100).build();
/// let mut cursor = coll.find(doc! { "qty": { "$gt": 4 } }, options);
/// while let Some(item) = cursor.try_next().await? {
///     println!("{}", item);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Collection {
    client: Client,
    ns: Namespace,
}

impl Collection {
    pub(crate) fn new(db: &Database, name: &str) -> Self {
        Self {
            client: db.client().clone(),
            ns: Namespace::new(db.name(), name),
        }
    }

    /// Gets the name of the `Collection`.
    pub fn name(&self) -> &str {
        &self.ns.coll
    }

    /// Gets the namespace of the `Collection`.
    ///
    /// The namespace of a MongoDB collection is the concatenation of the name of the database
    /// containing it, the '.' character, and the name of the collection itself. For example, if a
    /// collection named "bar" is created in a database named "foo", the namespace of the collection
    /// is "foo.bar".
    pub fn namespace(&self) -> Namespace {
        self.ns.clone()
    }

    /// Finds the documents in the collection matching `filter`.
    ///
    /// The query is sent on the first call to [`Cursor::next`]. Depending on the wire version of
    /// the selected server and on the `exhaust` option, it runs as a find command or as a
    /// legacy OP_QUERY.
    pub fn find(
        &self,
        filter: impl Into<Option<Document>>,
        options: impl Into<Option<FindOptions>>,
    ) -> Cursor {
        Cursor::find(
            self.client.clone(),
            self.ns.clone(),
            filter.into().unwrap_or_default(),
            options.into().unwrap_or_default(),
        )
    }

    /// Finds a single document in the collection matching `filter`.
    pub async fn find_one(
        &self,
        filter: impl Into<Option<Document>>,
        options: impl Into<Option<FindOptions>>,
    ) -> Result<Option<Document>> {
        let mut options = options.into().unwrap_or_default();
        options.limit = Some(-1);
        let mut cursor = self.find(filter, options);
        cursor.try_next().await
    }

    /// Runs an aggregation pipeline over the collection.
    ///
    /// `AggregateOptions::batch_size` only sizes the first batch; later batches use the
    /// cursor's own batch size, see [`Cursor::set_batch_size`].
    pub fn aggregate(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<AggregateOptions>>,
    ) -> Result<Cursor> {
        let options = options.into().unwrap_or_default();
        let pipeline: Vec<Bson> = pipeline.into_iter().map(Bson::Document).collect();

        let mut command = doc! {
            "aggregate": self.ns.coll.as_str(),
            "pipeline": pipeline,
        };
        command.extend(crate::bson::to_document(&options)?);
        if !command.contains_key("cursor") {
            command.insert("cursor", Document::new());
        }

        Ok(Cursor::command(
            self.client.clone(),
            self.ns.clone(),
            command,
            CursorOptions::default(),
            options.read_preference,
        ))
    }

    /// Opens a change stream over this collection.
    pub fn watch(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<ChangeStreamOptions>>,
    ) -> ChangeStream {
        ChangeStream::new(
            self.client.clone(),
            ChangeStreamTarget::Collection(self.ns.clone()),
            pipeline.into_iter().collect(),
            options.into().unwrap_or_default(),
        )
    }
}

/// A struct modeling the canonical name for a collection in MongoDB.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    /// The name of the database associated with this namespace.
    pub db: String,

    /// The name of the collection this namespace corresponds to.
    pub coll: String,
}

impl Namespace {
    /// Construct a `Namespace` with the given database and collection.
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }

    /// The pseudo-namespace a database command runs against.
    pub(crate) fn command(db: impl Into<String>) -> Self {
        Self::new(db, "$cmd")
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}.{}", self.db, self.coll)
    }
}

impl<'de> Deserialize<'de> for Namespace {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

impl Serialize for Namespace {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl FromStr for Namespace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Ok(Self::new(db, coll)),
            _ => Err(Error::invalid_argument(
                "Missing one or more fields in namespace",
            )),
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::Namespace;

    #[test]
    fn namespace_splits_on_first_dot() {
        let ns: Namespace = "db.coll.with.dots".parse().unwrap();
        assert_eq!(ns, Namespace::new("db", "coll.with.dots"));
        assert_eq!(ns.to_string(), "db.coll.with.dots");

        assert!("nodot".parse::<Namespace>().is_err());
        assert!(".coll".parse::<Namespace>().is_err());
        assert!("db.".parse::<Namespace>().is_err());
    }
}
