/// Whether an extractor failure is worth another session attempt.
///
/// | Class | Restarted by the orchestrator? |
/// |-------|-------------------------------|
/// | `Never` | No, the key fails |
/// | `WithBackoff` | Yes, per the restart policy |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Bad input that will not fix itself: missing or malformed replay data,
    /// unknown schema.
    Never,

    /// The source may come back: feed offline, disconnect, transient I/O.
    WithBackoff,
}
