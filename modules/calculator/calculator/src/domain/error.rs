/// Errors returned by the calculation handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// The operation selector is not one the handler implements.
    #[error("undefined operation")]
    UnsupportedOperation { selector: i32 },

    /// The caller gave up before the handler started.
    #[error("client cancelled: abandoning")]
    Cancelled,
}
