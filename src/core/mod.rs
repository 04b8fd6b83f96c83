// Storage core: key codec, store handle, cursor, and the three namespaces built on them.
pub mod cursor;
pub mod error;
pub mod keys;
pub mod rows;
pub mod store;
pub mod tabledef;
pub mod tags;
