//! Database operations and management

use crate::btree::BTree;
use crate::comparator::{Comparator, KeyOrdering, LexicographicComparator};
use crate::env::{state, Environment};
use crate::error::{Error, PageId, Result};
use crate::meta::DbInfo;
use crate::txn::{mode::Mode, Transaction};
use bitflags::bitflags;
use std::marker::PhantomData;
use std::sync::Arc;

bitflags! {
    /// Database flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DatabaseFlags: u32 {
        /// Use reverse string comparison
        const REVERSE_KEY = 0x02;
        /// Use sorted duplicates
        const DUP_SORT = 0x04;
        /// Numeric keys in native byte order
        const INTEGER_KEY = 0x08;
        /// With DUP_SORT, sorted dup items have fixed size
        const DUP_FIXED = 0x10;
        /// With DUP_SORT, dups are numeric in native byte order
        const INTEGER_DUP = 0x20;
        /// With DUP_SORT, use reverse string dups
        const REVERSE_DUP = 0x40;
        /// Create DB if not already existing
        const CREATE = 0x40000;
    }
}

/// Key encoding trait
pub trait Key: Send + Sync {
    /// Encode the key to bytes
    fn encode(&self) -> Result<Vec<u8>>;
}

/// Value encoding trait
pub trait Value: Send + Sync {
    /// Encode the value to bytes
    fn encode(&self) -> Result<Vec<u8>>;
    /// Decode the value from bytes
    fn decode(bytes: &[u8]) -> Result<Self>
    where
        Self: Sized;
}

// Implement Key for common types
impl Key for &[u8] {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(self.to_vec())
    }
}

impl Key for Vec<u8> {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(self.clone())
    }
}

impl Key for &str {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(self.as_bytes().to_vec())
    }
}

impl Key for String {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(self.as_bytes().to_vec())
    }
}

// Implement Value for common types
impl Value for Vec<u8> {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(self.clone())
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bytes.to_vec())
    }
}

impl Value for &[u8] {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(self.to_vec())
    }

    fn decode(_bytes: &[u8]) -> Result<Self> {
        Err(Error::Custom("Cannot decode into borrowed slice".into()))
    }
}

impl Value for String {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(self.as_bytes().to_vec())
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::Decoding(format!("Invalid UTF-8: {}", e).into()))
    }
}

/// Database handle
pub struct Database<K = Vec<u8>, V = Vec<u8>, C = LexicographicComparator> {
    env_inner: Arc<crate::env::EnvInner>,
    name: Option<String>,
    info: DbInfo,
    _phantom: PhantomData<(K, V, C)>,
}

impl<K: Key, V: Value, C: Comparator> Database<K, V, C> {
    /// Create a new database handle
    pub(crate) fn new(
        env_inner: Arc<crate::env::EnvInner>,
        name: Option<String>,
        info: DbInfo,
    ) -> Self {
        Self { env_inner, name, info, _phantom: PhantomData }
    }

    /// Open a database in the environment
    pub fn open(
        env: &Environment<state::Open>,
        name: Option<&str>,
        flags: DatabaseFlags,
    ) -> Result<Self> {
        let inner = env.inner();

        // Check if it's the main database (no name)
        if name.is_none() {
            let info = inner
                .databases
                .read()
                .unwrap()
                .get(&None)
                .copied()
                .ok_or(Error::InvalidDatabase)?;

            return Ok(Self { env_inner: inner.clone(), name: None, info, _phantom: PhantomData });
        }

        // For named databases, we need to check the catalog
        // First check the cache
        if let Some(info) = inner.databases.read().unwrap().get(&name.map(|s| s.to_string())) {
            return Ok(Self {
                env_inner: inner.clone(),
                name: name.map(|s| s.to_string()),
                info: *info,
                _phantom: PhantomData,
            });
        }

        // Not in cache, need to look in the catalog or create
        if flags.contains(DatabaseFlags::CREATE) {
            // Create a new database
            let mut txn = env.write_txn()?;

            // Check catalog first
            if let Some(info) = crate::catalog::Catalog::get_database(&txn, name.unwrap())? {
                // Already exists in catalog
                txn.abort();

                // Cache it
                inner.databases.write().unwrap().insert(name.map(|s| s.to_string()), info);

                Ok(Self {
                    env_inner: inner.clone(),
                    name: name.map(|s| s.to_string()),
                    info,
                    _phantom: PhantomData,
                })
            } else {
                // Create new database
                let (root_id, root_page) = txn.alloc_page(crate::page::PageFlags::LEAF)?;
                root_page.header.num_keys = 0;

                let info = DbInfo {
                    flags: flags.bits(),
                    depth: 1,
                    branch_pages: 0,
                    leaf_pages: 1,
                    overflow_pages: 0,
                    entries: 0,
                    root: root_id,
                    last_key_page: PageId(0),
                };

                // Store in catalog
                crate::catalog::Catalog::put_database(&mut txn, name.unwrap(), &info)?;

                // Update transaction's database list
                txn.update_db_info(name, info)?;

                // Commit the transaction
                txn.commit()?;

                // Cache it
                inner.databases.write().unwrap().insert(name.map(|s| s.to_string()), info);

                Ok(Self {
                    env_inner: inner.clone(),
                    name: name.map(|s| s.to_string()),
                    info,
                    _phantom: PhantomData,
                })
            }
        } else {
            // Must exist - check catalog
            let txn = env.read_txn()?;

            if let Some(info) = crate::catalog::Catalog::get_database(&txn, name.unwrap())? {
                // Cache it
                inner.databases.write().unwrap().insert(name.map(|s| s.to_string()), info);

                Ok(Self {
                    env_inner: inner.clone(),
                    name: name.map(|s| s.to_string()),
                    info,
                    _phantom: PhantomData,
                })
            } else {
                Err(Error::InvalidDatabase)
            }
        }
    }

    /// Get a value from the database
    pub fn get<'txn, M: Mode>(&self, txn: &Transaction<'txn, M>, key: &K) -> Result<Option<V>> {
        let key_bytes = key.encode()?;

        // Try to get the latest database info from the transaction first
        // This is important for consistency within a transaction
        let db_info = match txn.db_info(self.name.as_deref()) {
            Ok(info) => info,
            Err(_) => {
                // Not in transaction cache, use our cached info
                // Note: For read transactions from a reopened environment,
                // the entries count may be stale, but the root page is correct
                &self.info
            }
        };

        // Don't check entries count for read transactions as it may be stale
        // Just check if we have a valid root page
        if db_info.root == crate::error::PageId(0) {
            return Ok(None);
        }

        match BTree::<C>::search(txn, db_info.root, &key_bytes)? {
            Some(value_bytes) => {
                let value = V::decode(&value_bytes)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Put a value into the database
    pub fn put(
        &self,
        txn: &mut Transaction<'_, crate::txn::Write>,
        key: K,
        value: V,
    ) -> Result<()> {
        let key_bytes = key.encode()?;
        let value_bytes = value.encode()?;

        // Get mutable db info
        let db_info = txn.db_info(self.name.as_deref())?;
        let mut info = *db_info;
        let mut root = info.root;

        // Check if DUPSORT is enabled
        if crate::dupsort::DupSort::is_dupsort(info.flags) {
            // Use DUPSORT insert
            crate::dupsort::DupSort::insert(txn, &mut info, &key_bytes, &value_bytes)?;
            root = info.root;
        } else {
            // Regular insert
            BTree::<C>::insert(txn, &mut root, &mut info, &key_bytes, &value_bytes)?;
        }

        // Update db info if root changed
        if root != info.root {
            info.root = root;
        }

        // Update transaction's database info
        txn.update_db_info(self.name.as_deref(), info)?;

        Ok(())
    }

    /// Delete a value from the database
    pub fn delete(&self, txn: &mut Transaction<'_, crate::txn::Write>, key: &K) -> Result<bool> {
        let key_bytes = key.encode()?;

        // Get mutable db info
        let db_info = txn.db_info(self.name.as_deref())?;
        let mut info = *db_info;
        let mut root = info.root;

        let result = BTree::<C>::delete(txn, &mut root, &mut info, &key_bytes)?;
        if result.is_some() {
            // Update db info if needed
            if root != info.root {
                info.root = root;
            }
            txn.update_db_info(self.name.as_deref(), info)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Get the database name
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Clear all entries from the database
    pub fn clear(&self, txn: &mut Transaction<'_, crate::txn::Write>) -> Result<()> {
        // Allocate a new empty root page
        let (new_root_id, new_root) = txn.alloc_page(crate::page::PageFlags::LEAF)?;

        // Initialize the new root page as an empty leaf
        new_root.header.num_keys = 0;

        // Update database info
        let db_info = txn.db_info(self.name.as_deref())?;
        let mut info = *db_info;

        // Free all pages in the old tree
        if info.root.0 != 0 && info.root != new_root_id {
            crate::tree_utils::free_tree(txn, info.root)?;
        }

        info.root = new_root_id;
        info.entries = 0;
        info.depth = 0;
        info.leaf_pages = 1;
        info.branch_pages = 0;
        info.overflow_pages = 0;

        txn.update_db_info(self.name.as_deref(), info)?;

        Ok(())
    }

    /// Create a cursor for iterating over the database
    pub fn cursor<'txn, M: crate::txn::mode::Mode>(
        &'txn self,
        txn: &'txn Transaction<'txn, M>,
    ) -> Result<crate::cursor::Cursor<'txn, K, V, C>> {
        crate::cursor::Cursor::new(txn, self)
    }

    /// Get the number of entries in the database
    pub fn len<M: Mode>(&self, txn: &Transaction<'_, M>) -> Result<u64> {
        let db_info = txn.db_info(self.name.as_deref())?;
        Ok(db_info.entries)
    }

    /// Check if the database is empty
    pub fn is_empty<M: Mode>(&self, txn: &Transaction<'_, M>) -> Result<bool> {
        Ok(self.len(txn)? == 0)
    }

    /// Put a value into the database with duplicate support
    /// If DUPSORT is enabled, this allows multiple values per key
    pub fn put_dup(
        &self,
        txn: &mut Transaction<'_, crate::txn::Write>,
        key: K,
        value: V,
    ) -> Result<()> {
        let key_bytes = key.encode()?;
        let value_bytes = value.encode()?;

        // Get mutable db info
        let db_info = txn.db_info(self.name.as_deref())?;
        let mut info = *db_info;

        if crate::dupsort::DupSort::is_dupsort(info.flags) {
            // Use dupsort insertion
            crate::dupsort::DupSort::insert(txn, &mut info, &key_bytes, &value_bytes)?;
        } else {
            // Regular insertion
            let mut root = info.root;
            BTree::<C>::insert(txn, &mut root, &mut info, &key_bytes, &value_bytes)?;
            if root != info.root {
                info.root = root;
            }
        }

        // Update transaction's database info
        txn.update_db_info(self.name.as_deref(), info)?;

        Ok(())
    }

    /// Get all values for a key (for DUPSORT databases)
    pub fn get_all<'txn, M: Mode>(&self, txn: &Transaction<'txn, M>, key: &K) -> Result<Vec<V>> {
        let key_bytes = key.encode()?;

        // Get current database info from transaction
        let db_info = txn.db_info(self.name.as_deref())?;

        if crate::dupsort::DupSort::is_dupsort(db_info.flags) {
            let values = crate::dupsort::DupSort::get_all(txn, db_info.root, &key_bytes)?;
            let mut decoded_values = Vec::with_capacity(values.len());
            for value_bytes in values {
                decoded_values.push(V::decode(&value_bytes)?);
            }
            Ok(decoded_values)
        } else {
            // Regular get - return single value as array
            match BTree::<C>::search(txn, db_info.root, &key_bytes)? {
                Some(value_bytes) => {
                    let value = V::decode(&value_bytes)?;
                    Ok(vec![value])
                }
                None => Ok(Vec::new()),
            }
        }
    }

    /// Delete a specific value for a key (for DUPSORT databases)
    pub fn delete_dup(
        &self,
        txn: &mut Transaction<'_, crate::txn::Write>,
        key: &K,
        value: &V,
    ) -> Result<bool> {
        let key_bytes = key.encode()?;
        let value_bytes = value.encode()?;

        // Get mutable db info
        let db_info = txn.db_info(self.name.as_deref())?;
        let mut info = *db_info;

        let deleted = if crate::dupsort::DupSort::is_dupsort(info.flags) {
            crate::dupsort::DupSort::delete(txn, &mut info, &key_bytes, &value_bytes)?
        } else {
            // For non-DUPSORT, delete only if value matches
            match BTree::<C>::search(txn, info.root, &key_bytes)? {
                Some(existing_value) => {
                    if existing_value == value_bytes {
                        let mut root = info.root;
                        BTree::<C>::delete(txn, &mut root, &mut info, &key_bytes)?;
                        if root != info.root {
                            info.root = root;
                        }
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };

        // Update transaction's database info
        txn.update_db_info(self.name.as_deref(), info)?;

        Ok(deleted)
    }
}

impl<K, V, C> Clone for Database<K, V, C> {
    fn clone(&self) -> Self {
        Self {
            env_inner: self.env_inner.clone(),
            name: self.name.clone(),
            info: self.info,
            _phantom: PhantomData,
        }
    }
}

/// Reject flags whose implied key ordering isn't `LexicographicComparator`,
/// the only comparator `Database<K, V>`'s default third type parameter ever
/// instantiates. Selecting `REVERSE_KEY`/`INTEGER_KEY` here would silently
/// store entries under one ordering while reading them back under another.
fn check_flags_match_lexicographic(flags: DatabaseFlags) -> Result<()> {
    let reverse_key = flags.contains(DatabaseFlags::REVERSE_KEY);
    let integer_key = flags.contains(DatabaseFlags::INTEGER_KEY);
    if reverse_key && integer_key {
        return Err(Error::InvalidParameter("REVERSE_KEY and INTEGER_KEY are mutually exclusive"));
    }
    if KeyOrdering::from_key_flags(reverse_key, integer_key) != KeyOrdering::Lexicographic {
        return Err(Error::InvalidOperation(
            "REVERSE_KEY/INTEGER_KEY require opening the database with a matching Comparator type parameter",
        ));
    }
    Ok(())
}

// Environment extension to create databases
impl Environment<state::Open> {
    /// Open or create a database
    pub fn create_database<K: Key, V: Value>(
        self: &Arc<Self>,
        txn: &mut Transaction<'_, crate::txn::Write>,
        name: Option<&str>,
    ) -> Result<Database<K, V>> {
        self.create_database_with_flags(txn, name, DatabaseFlags::empty())
    }

    /// Open or create a database with specific flags
    pub fn create_database_with_flags<K: Key, V: Value>(
        self: &Arc<Self>,
        txn: &mut Transaction<'_, crate::txn::Write>,
        name: Option<&str>,
        flags: DatabaseFlags,
    ) -> Result<Database<K, V>> {
        // `Database<K, V>` defaults its comparator to `LexicographicComparator`;
        // a table whose flags demand a different built-in ordering can't be
        // represented by the value this function returns.
        check_flags_match_lexicographic(flags)?;

        // Main database (unnamed) is special - it already exists
        if name.is_none() {
            let info = txn.db_info(None)?;
            return Ok(Database::new(self.inner().clone(), None, *info));
        }

        // For named databases, check if it already exists in the main database
        let db_name = name.unwrap();

        // Check if database already exists in transaction cache
        if let Ok(info) = txn.db_info(Some(db_name)) {
            return Ok(Database::new(self.inner().clone(), Some(db_name.to_string()), *info));
        }

        // Check if database exists in the main database catalog
        let main_db_info = *txn.db_info(None)?;
        match BTree::<LexicographicComparator>::search(txn, main_db_info.root, db_name.as_bytes())?
        {
            Some(value) => {
                // Database exists, decode the DbInfo using Catalog deserialization
                if let Ok(info) = crate::catalog::Catalog::deserialize_db_info(&value) {
                    // Cache in transaction
                    txn.update_db_info(Some(db_name), info)?;

                    return Ok(Database::new(
                        self.inner().clone(),
                        Some(db_name.to_string()),
                        info,
                    ));
                }
            }
            None => {
                // Database doesn't exist, create it
                let (root_id, _) = txn.alloc_page(crate::page::PageFlags::LEAF)?;

                let info = DbInfo {
                    flags: flags.bits(),
                    depth: 0,
                    branch_pages: 0,
                    leaf_pages: 1,
                    overflow_pages: 0,
                    entries: 0,
                    root: root_id,
                    last_key_page: PageId(0),
                };

                // Store in the main database catalog
                let mut main_db_info = main_db_info;
                let mut main_root = main_db_info.root;

                // Encode DbInfo using Catalog serialization
                let info_bytes = crate::catalog::Catalog::serialize_db_info(&info);

                // Insert into main database
                BTree::<LexicographicComparator>::insert(
                    txn,
                    &mut main_root,
                    &mut main_db_info,
                    db_name.as_bytes(),
                    &info_bytes,
                )?;

                // Update main database info
                main_db_info.root = main_root;
                txn.update_db_info(None, main_db_info)?;

                // Cache in transaction
                txn.update_db_info(Some(db_name), info)?;

                return Ok(Database::new(self.inner().clone(), Some(db_name.to_string()), info));
            }
        }

        Err(Error::InvalidDatabase)
    }

    /// Open an existing database
    pub fn open_database<K: Key, V: Value>(
        self: &Arc<Self>,
        txn: &Transaction<'_, impl Mode>,
        name: Option<&str>,
    ) -> Result<Database<K, V>> {
        // Try transaction cache first
        if let Ok(info) = txn.db_info(name) {
            check_flags_match_lexicographic(DatabaseFlags::from_bits_truncate(info.flags))?;
            return Ok(Database::new(self.inner().clone(), name.map(String::from), *info));
        }

        // Check environment cache
        if let Some(info) = self.inner().databases.read().unwrap().get(&name.map(String::from)) {
            check_flags_match_lexicographic(DatabaseFlags::from_bits_truncate(info.flags))?;
            return Ok(Database::new(self.inner().clone(), name.map(String::from), *info));
        }

        // For named databases, look in the main database
        if let Some(db_name) = name {
            let main_db_info = txn.db_info(None)?;
            if let Some(value) = BTree::<LexicographicComparator>::search(
                txn,
                main_db_info.root,
                db_name.as_bytes(),
            )? {
                // Try to deserialize using Catalog format
                if let Ok(info) = crate::catalog::Catalog::deserialize_db_info(&value) {
                    check_flags_match_lexicographic(DatabaseFlags::from_bits_truncate(info.flags))?;
                    // Cache in the environment
                    self.inner()
                        .databases
                        .write()
                        .unwrap()
                        .insert(Some(db_name.to_string()), info);
                    return Ok(Database::new(
                        self.inner().clone(),
                        Some(db_name.to_string()),
                        info,
                    ));
                }
            }
        }

        Err(Error::InvalidDatabase)
    }

    /// List all named databases
    pub fn list_databases(
        self: &Arc<Self>,
        txn: &Transaction<'_, impl Mode>,
    ) -> Result<Vec<String>> {
        let main_db_info = txn.db_info(None)?;
        let mut databases = Vec::new();

        // Create a cursor to iterate through the main database
        let db: Database<Vec<u8>, Vec<u8>> =
            Database::new(self.inner().clone(), None, *main_db_info);
        let mut cursor = db.cursor(txn)?;

        // Iterate through all entries
        while let Some((key, _value)) = cursor.next()? {
            if let Ok(name) = String::from_utf8(key) {
                databases.push(name);
            }
        }

        Ok(databases)
    }

    /// Drop a database
    pub fn drop_database(
        self: &Arc<Self>,
        txn: &mut Transaction<'_, crate::txn::Write>,
        name: &str,
    ) -> Result<()> {
        // Cannot drop the main database
        if name.is_empty() {
            return Err(Error::InvalidOperation("Cannot drop the main database"));
        }

        // Check if database exists
        let (db_info_to_drop, main_db_info_root) = {
            let main_db_info = txn.db_info(None)?;
            match BTree::<LexicographicComparator>::search(txn, main_db_info.root, name.as_bytes())?
            {
                Some(value) => {
                    if value.len() == std::mem::size_of::<DbInfo>() {
                        let mut db_info = DbInfo::default();
                        unsafe {
                            std::ptr::copy_nonoverlapping(
                                value.as_ptr(),
                                &mut db_info as *mut _ as *mut u8,
                                std::mem::size_of::<DbInfo>(),
                            );
                        }
                        Some((db_info, main_db_info.root))
                    } else {
                        None
                    }
                }
                None => None,
            }
        }
        .ok_or(Error::InvalidDatabase)?;

        crate::tree_utils::free_tree(txn, db_info_to_drop.root)?;

        // Remove from main database
        let main_db_info = *txn.db_info(None)?;
        let mut main_db_info_mut = main_db_info;
        let mut main_root = main_db_info_root;

        BTree::<LexicographicComparator>::delete(
            txn,
            &mut main_root,
            &mut main_db_info_mut,
            name.as_bytes(),
        )?;

        // Update main database info
        main_db_info_mut.root = main_root;
        txn.update_db_info(None, main_db_info_mut)?;

        // Remove from transaction cache
        txn.data.databases.remove(&Some(name.to_string()));

        Ok(())
    }
}
