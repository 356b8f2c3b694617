use std::time::Duration;

/// Limits applied to a script run.
///
/// Harness scripts spend most of their time blocked in `recv`/`expect`, so the
/// wall-clock timeout is generous and the operation budget is unbounded by
/// default. The remaining limits guard against runaway data structures.
#[derive(Debug, Clone)]
pub struct ScriptConfig {
    /// Wall-clock budget for one run, checked between engine operations.
    pub timeout: Duration,
    /// Engine operation budget; zero disables the check.
    pub max_operations: u64,
    /// Deepest allowed script function call chain.
    pub max_call_levels: usize,
    /// Expression nesting limits: (top level, inside functions).
    pub max_expr_depths: (usize, usize),
    /// Longest string a script may build, in bytes.
    pub max_string_size: usize,
    /// Largest array or object map a script may build.
    pub max_collection_size: usize,
    /// Number of modules a script may import.
    pub max_modules: usize,
}

impl ScriptConfig {
    /// Same limits with a different wall-clock timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            max_operations: 0,
            max_call_levels: 64,
            max_expr_depths: (64, 32),
            max_string_size: 1 << 20,
            max_collection_size: 100_000,
            max_modules: 16,
        }
    }
}
