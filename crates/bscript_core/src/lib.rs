//! bscript_core: Memory and text primitives shared by the bscript compiler.
//!
//! Provides the per-file [`BumpPool`], the shared [`ConcurrentBumpPool`] used
//! for raw file buffers, the generation-tagged [`StringPool`], and source
//! spans.

pub mod arena;
pub mod concurrent_arena;
pub mod string_pool;
pub mod text;

pub use arena::{ArenaError, BumpPool, Placed, PoolId};
pub use concurrent_arena::ConcurrentBumpPool;
pub use string_pool::{StringId, StringPool, StringPoolError};
pub use text::{LineColumn, LineMap, TextSpan};
