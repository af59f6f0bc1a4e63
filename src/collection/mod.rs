// Tensor collections
//
// Named groups of tensors selected by regex and explicit membership, and the
// registry that owns them.

mod collection;
mod manager;
mod scope;

pub use collection::{Collection, CollectionKeys, Pattern, is_member};
pub use manager::{CollectionManager, COLLECTIONS_FORMAT_VERSION, DEFAULT_COLLECTION_PATTERNS};
pub use scope::CollectionScope;
