//! The model boundaries handlers talk to.
//!
//! Persistence is an external collaborator; this module only fixes the record
//! shapes the templates see and the interfaces handlers call. The in-memory
//! implementations back the demo server and the tests.

mod snippets;
mod users;

pub use snippets::{MemorySnippets, Snippet, SnippetModel};
pub use users::{MemoryUsers, UserModel};
