//! Cache key to document address mapping.
//!
//! Every cache key corresponds to exactly one document in the document
//! store. The mapping is pluggable: anything implementing [`KeyMap`] (plain
//! closures included) can be handed to the client and the synchronizer. Both
//! sides of a deployment must agree on it.

/// Where a record lives in the document store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocAddress {
    pub database: String,
    pub collection: String,
    pub id: String,
}

/// Maps a flat cache key to a document address. Must be pure: the client and
/// the synchronizer call it independently and expect identical answers.
pub trait KeyMap: Send + Sync {
    fn map(&self, key: &str) -> DocAddress;
}

impl<F> KeyMap for F
where
    F: Fn(&str) -> DocAddress + Send + Sync,
{
    fn map(&self, key: &str) -> DocAddress {
        self(key)
    }
}

/// Default mapping: split the key on `:` into at most three fields.
///
/// - `db:coll:id` → (`db`, `coll`, `id`)
/// - `coll:id` → (default database, `coll`, `id`)
/// - `id` → (default database, default collection, `id`)
///
/// # Example
///
/// ```
/// use mirror_cache::{KeyMap, SplitKeyMap};
///
/// let m = SplitKeyMap::default();
/// let addr = m.map("game:player:1001");
/// assert_eq!(addr.database, "game");
/// assert_eq!(addr.collection, "player");
/// assert_eq!(addr.id, "1001");
/// ```
#[derive(Debug, Clone)]
pub struct SplitKeyMap {
    /// Database used when the key doesn't name one.
    pub database: String,
    /// Collection used when the key names neither database nor collection.
    pub collection: String,
}

impl Default for SplitKeyMap {
    fn default() -> Self {
        Self { database: "mirror".to_string(), collection: "data".to_string() }
    }
}

impl KeyMap for SplitKeyMap {
    fn map(&self, key: &str) -> DocAddress {
        let fields: Vec<&str> = key.splitn(3, ':').collect();
        match fields.as_slice() {
            [db, coll, id] => DocAddress {
                database: (*db).to_string(),
                collection: (*coll).to_string(),
                id: (*id).to_string(),
            },
            [coll, id] => DocAddress {
                database: self.database.clone(),
                collection: (*coll).to_string(),
                id: (*id).to_string(),
            },
            _ => DocAddress {
                database: self.database.clone(),
                collection: self.collection.clone(),
                id: key.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_fields() {
        let addr = SplitKeyMap::default().map("app:users:alice");
        assert_eq!(addr.database, "app");
        assert_eq!(addr.collection, "users");
        assert_eq!(addr.id, "alice");
    }

    #[test]
    fn test_two_fields_use_default_database() {
        let addr = SplitKeyMap::default().map("users:alice");
        assert_eq!(addr.database, "mirror");
        assert_eq!(addr.collection, "users");
        assert_eq!(addr.id, "alice");
    }

    #[test]
    fn test_one_field_uses_defaults() {
        let addr = SplitKeyMap::default().map("alice");
        assert_eq!(addr.database, "mirror");
        assert_eq!(addr.collection, "data");
        assert_eq!(addr.id, "alice");
    }

    #[test]
    fn test_extra_separators_stay_in_id() {
        // splitn(3) keeps everything after the second separator in the id
        let addr = SplitKeyMap::default().map("app:users:alice:session:7");
        assert_eq!(addr.id, "alice:session:7");
    }

    #[test]
    fn test_closure_mapping() {
        let m = |key: &str| DocAddress {
            database: "fixed".to_string(),
            collection: "fixed".to_string(),
            id: key.to_string(),
        };
        let addr = m.map("anything");
        assert_eq!(addr.database, "fixed");
        assert_eq!(addr.id, "anything");
    }
}
