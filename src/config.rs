/// Order used for resource synchronizations unless configured otherwise.
pub const DEFAULT_SYNCHRONIZATION_ORDER: i32 = 1000;

/// Settings for one transaction context.
///
/// Passed to [`crate::TransactionContext::with_config`]; there is no global
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynchronizationConfig {
    /// Register completion callbacks for newly created resources at all.
    /// When false, resources are handed out unbound even inside a transaction.
    pub allow_synchronization: bool,

    /// The attached external transaction manager releases new resources
    /// itself at its own completion point.
    pub external_completion: bool,

    /// Order of resource synchronizations; lower values run first.
    pub synchronization_order: i32,
}

impl Default for SynchronizationConfig {
    fn default() -> Self {
        Self {
            allow_synchronization: true,
            external_completion: false,
            synchronization_order: DEFAULT_SYNCHRONIZATION_ORDER,
        }
    }
}

impl SynchronizationConfig {
    pub fn with_allow_synchronization(mut self, allow: bool) -> Self {
        self.allow_synchronization = allow;
        self
    }

    pub fn with_external_completion(mut self, external_completion: bool) -> Self {
        self.external_completion = external_completion;
        self
    }

    pub fn with_synchronization_order(mut self, order: i32) -> Self {
        self.synchronization_order = order;
        self
    }
}
