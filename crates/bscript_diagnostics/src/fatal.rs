use bscript_core::{ArenaError, StringPoolError};

/// An error that aborts the whole compilation session.
///
/// Fatal errors are handed to every thread waiting on the job that raised
/// them, so they are `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FatalError {
    #[error(transparent)]
    Arena(#[from] ArenaError),
    #[error(transparent)]
    StringPool(#[from] StringPoolError),
    #[error("job table is full ({capacity} jobs)")]
    JobCapacity { capacity: usize },
    #[error("job `{job}` was queued before it was registered")]
    UnregisteredJob { job: String },
    #[error("job `{job}` is already registered")]
    AlreadyRegistered { job: String },
    #[error("dependency cycle: {}", .chain.join(" -> "))]
    DependencyCycle { chain: Vec<String> },
    #[error("job `{job}` panicked: {message}")]
    JobPanicked { job: String, message: String },
    #[error("compilation node `{module}` was released while its jobs were still reachable")]
    NodeReleased { module: String },
    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_the_chain() {
        let err = FatalError::DependencyCycle {
            chain: vec!["a:A semantic".into(), "b:B semantic".into(), "a:A semantic".into()],
        };
        assert_eq!(
            err.to_string(),
            "dependency cycle: a:A semantic -> b:B semantic -> a:A semantic"
        );
    }

    #[test]
    fn test_wraps_allocator_errors() {
        let err: FatalError = ArenaError::HeapChainFull { heaps: 2 }.into();
        assert_eq!(err.to_string(), "arena heap chain is full (2 heaps)");
    }
}
